//! Engine configuration.
//!
//! Sources, later ones win:
//! 1. built-in defaults
//! 2. an optional file (`toml`, `json`, `yaml`, picked by extension)
//! 3. `SHUTTLE__*` environment variables, `__` separating nested keys
//!    (`SHUTTLE__BROKER__ENDPOINT`, `SHUTTLE__POLICIES__GENERATE_PDF__MAX_RETRIES`)
//!
//! Durations are given in milliseconds.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{TaskKind, UnknownTaskKind};
use crate::queue::{BackoffPolicy, TaskPolicy};

const ENV_PREFIX: &str = "SHUTTLE";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error(transparent)]
    UnknownTaskKind(#[from] UnknownTaskKind),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Broker connection settings. Opaque to the in-memory broker; carried so a
/// real adapter can be wired from the same file.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "memory://local".to_string(),
            username: None,
            password: None,
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreRetryConfig {
    /// Total attempts per write, including the first.
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Terminal records older than this are deleted. `None` disables the loop.
    pub retention_ms: Option<u64>,
    pub interval_ms: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            retention_ms: None,
            interval_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        base_delay_ms: u64,
        factor: f64,
        max_delay_ms: u64,
    },
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        match *config {
            BackoffConfig::Fixed { delay_ms } => {
                BackoffPolicy::fixed(Duration::from_millis(delay_ms))
            }
            BackoffConfig::Exponential {
                base_delay_ms,
                factor,
                max_delay_ms,
            } => BackoffPolicy::exponential(
                Duration::from_millis(base_delay_ms),
                factor,
                Duration::from_millis(max_delay_ms),
            ),
        }
    }
}

/// Partial task policy; unset fields keep the value underneath.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub concurrency: Option<usize>,
    pub execution_budget_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff: Option<BackoffConfig>,
    pub retry_on_timeout: Option<bool>,
}

impl PolicyConfig {
    pub fn apply_to(&self, mut policy: TaskPolicy) -> TaskPolicy {
        if let Some(concurrency) = self.concurrency {
            policy.concurrency = concurrency;
        }
        if let Some(ms) = self.execution_budget_ms {
            policy.execution_budget = Duration::from_millis(ms);
        }
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(backoff) = &self.backoff {
            policy.backoff = backoff.into();
        }
        if let Some(retry_on_timeout) = self.retry_on_timeout {
            policy.retry_on_timeout = retry_on_timeout;
        }
        policy
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub broker: BrokerConfig,
    pub queue_name: String,

    /// Consumer workers pulling from the queue.
    pub workers: usize,

    pub poll_timeout_ms: u64,
    pub sweep_interval_ms: u64,

    /// CREATED/QUEUED records untouched for this long are published again.
    pub republish_after_ms: u64,
    pub sweep_batch_size: usize,

    /// Requeue delay for a delivery that overtook its CREATED -> QUEUED write.
    pub created_redelivery_delay_ms: u64,

    pub store_retry: StoreRetryConfig,
    pub reconnect: ReconnectConfig,

    /// Applied to every kind on top of its built-in defaults.
    pub default_policy: PolicyConfig,

    /// Per-kind overrides keyed by task kind name (case-insensitive).
    pub policies: HashMap<String, PolicyConfig>,

    pub gc: GcConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            queue_name: "shuttle.tasks".to_string(),
            workers: 4,
            poll_timeout_ms: 1_000,
            sweep_interval_ms: 1_000,
            republish_after_ms: 60_000,
            sweep_batch_size: 100,
            created_redelivery_delay_ms: 500,
            store_retry: StoreRetryConfig::default(),
            reconnect: ReconnectConfig::default(),
            default_policy: PolicyConfig::default(),
            policies: HashMap::new(),
            gc: GcConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then `path` if given and present, then `SHUTTLE__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let config: EngineConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = ::config::Config::builder()
            .add_source(::config::File::from_str(json, ::config::FileFormat::Json))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::Invalid("queue_name must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.poll_timeout_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_timeout_ms and sweep_interval_ms must be positive".into(),
            ));
        }
        if self.sweep_batch_size == 0 {
            return Err(ConfigError::Invalid("sweep_batch_size must be at least 1".into()));
        }
        if self.store_retry.attempts == 0 {
            return Err(ConfigError::Invalid("store_retry.attempts must be at least 1".into()));
        }
        if self.gc.interval_ms == 0 {
            return Err(ConfigError::Invalid("gc.interval_ms must be positive".into()));
        }
        for key in self.policies.keys() {
            key.parse::<TaskKind>()?;
        }
        for kind in TaskKind::ALL {
            self.policy_for(kind)
                .validate()
                .map_err(|reason| ConfigError::Invalid(format!("policy for {kind}: {reason}")))?;
        }
        Ok(())
    }

    /// Built-in defaults for `kind`, then `default_policy`, then the kind's
    /// own overrides.
    pub fn policy_for(&self, kind: TaskKind) -> TaskPolicy {
        let base = self.default_policy.apply_to(TaskPolicy::for_kind(kind));
        self.policies
            .iter()
            .filter(|(key, _)| key.parse::<TaskKind>().ok() == Some(kind))
            .fold(base, |policy, (_, overrides)| overrides.apply_to(policy))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn republish_after(&self) -> Duration {
        Duration::from_millis(self.republish_after_ms)
    }

    pub fn created_redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.created_redelivery_delay_ms)
    }

    pub fn store_retry_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_millis(self.store_retry.base_delay_ms),
            2.0,
            Duration::from_millis(self.store_retry.max_delay_ms),
        )
    }

    pub fn reconnect_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_millis(self.reconnect.base_delay_ms),
            2.0,
            Duration::from_millis(self.reconnect.max_delay_ms),
        )
    }

    pub fn gc_retention(&self) -> Option<Duration> {
        self.gc.retention_ms.map(Duration::from_millis)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 4);
        assert!(config.gc_retention().is_none());
    }

    #[test]
    fn json_overrides_defaults_and_kinds() {
        let config = EngineConfig::from_json_str(
            r#"{
                "workers": 2,
                "broker": { "endpoint": "amqp://mq:5672", "username": "shuttle", "password": "secret" },
                "default_policy": { "max_retries": 3 },
                "policies": {
                    "generate_pdf": {
                        "execution_budget_ms": 120000,
                        "backoff": { "strategy": "fixed", "delay_ms": 2000 }
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.poll_timeout_ms, 1_000);

        let pdf = config.policy_for(TaskKind::GeneratePdf);
        assert_eq!(pdf.max_retries, 3);
        assert_eq!(pdf.execution_budget, Duration::from_secs(120));
        assert_eq!(pdf.backoff, BackoffPolicy::fixed(Duration::from_secs(2)));

        let sitemap = config.policy_for(TaskKind::UpdateSitemap);
        assert_eq!(sitemap.max_retries, 3);
        assert_eq!(sitemap.backoff, BackoffPolicy::default());
    }

    #[test]
    fn password_is_masked_in_debug_output() {
        let config = EngineConfig::from_json_str(
            r#"{ "broker": { "endpoint": "amqp://mq", "password": "hunter2" } }"#,
        )
        .unwrap();

        let rendered = format!("{:?}", config.broker);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn unknown_policy_key_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "policies": { "make_coffee": { "max_retries": 1 } } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTaskKind(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "workers": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let err = EngineConfig::from_json_str(
            r#"{ "policies": { "UPDATE_SITEMAP": { "concurrency": 0 } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("UPDATE_SITEMAP"));
    }
}
