//! QueueManagerBuilder - 構築とワイヤリング
//!
//! # Fail-fast 設計
//! - expect_kinds() で期待される task kind を宣言
//! - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - policy と config もここで検証し、起動後には失敗しない

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::Semaphore;

use crate::config::{ConfigError, EngineConfig};
use crate::domain::{RegistryError, TaskKind};
use crate::ports::{BrokerGateway, Clock, IdGenerator, MessageRecordStore, SystemClock, UlidGenerator};
use crate::queue::{StoreWriter, TaskPolicy};
use crate::tasks::{PayloadCodec, TaskHandler, TaskRegistry};

use super::manager::{Engine, QueueManager};

/// QueueManagerBuilder は QueueManager を構築
///
/// # 使用例
/// ```ignore
/// let manager = QueueManagerBuilder::new()
///     .store(store)
///     .broker(broker)
///     .register(TaskKind::PurgeExpiredTickets, purge_handler)?
///     .expect_kinds(&[TaskKind::PurgeExpiredTickets])
///     .build()?;
/// ```
pub struct QueueManagerBuilder {
    registry: TaskRegistry,
    policies: HashMap<TaskKind, TaskPolicy>,
    expected_kinds: Option<Vec<TaskKind>>,
    store: Option<Arc<dyn MessageRecordStore>>,
    broker: Option<Arc<dyn BrokerGateway>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: EngineConfig,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task kinds: {0:?}. These kinds were expected but not registered.")]
    MissingTaskKinds(Vec<TaskKind>),

    #[error("no {0} configured")]
    MissingComponent(&'static str),

    #[error("invalid policy for {kind}: {reason}")]
    InvalidPolicy { kind: TaskKind, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueueManagerBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            policies: HashMap::new(),
            expected_kinds: None,
            store: None,
            broker: None,
            clock: None,
            ids: None,
            config: EngineConfig::default(),
        }
    }

    /// Handler を登録（同じ kind の二重登録はエラー）
    pub fn register<H: TaskHandler + 'static>(
        self,
        kind: TaskKind,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.register_shared(kind, Arc::new(handler))
    }

    pub fn register_shared(
        mut self,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, RegistryError> {
        // 最終的な policy は config が確定する build() で決める
        self.registry.register(kind, handler, TaskPolicy::for_kind(kind))?;
        Ok(self)
    }

    /// kind ごとの policy を明示的に指定（config より優先）
    ///
    /// 登録されていない kind を指定すると build() がエラーになる
    pub fn policy(mut self, kind: TaskKind, policy: TaskPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    /// 期待される task kind のリストを設定
    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected_kinds = Some(kinds.to_vec());
        self
    }

    pub fn store(mut self, store: Arc<dyn MessageRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn BrokerGateway>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// # 検証
    /// - expect_kinds() の kind が全て登録されているか
    /// - store / broker が設定されているか
    /// - config と各 kind の policy が妥当か
    /// - policy() で指定した kind が全て登録されているか
    pub fn build(mut self) -> Result<QueueManager, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let mut missing: Vec<TaskKind> = expected
                .iter()
                .copied()
                .filter(|kind| !self.registry.contains(*kind))
                .collect();
            if !missing.is_empty() {
                missing.sort();
                missing.dedup();
                return Err(BuildError::MissingTaskKinds(missing));
            }
        }

        let store = self.store.ok_or(BuildError::MissingComponent("record store"))?;
        let broker = self.broker.ok_or(BuildError::MissingComponent("broker"))?;
        self.config.validate()?;

        let mut limits = HashMap::new();
        for kind in self.registry.registered_kinds() {
            let policy = self
                .policies
                .remove(&kind)
                .unwrap_or_else(|| self.config.policy_for(kind));
            policy
                .validate()
                .map_err(|reason| BuildError::InvalidPolicy { kind, reason })?;
            limits.insert(kind, Arc::new(Semaphore::new(policy.concurrency)));
            self.registry.set_policy(kind, policy);
        }
        let mut orphaned: Vec<TaskKind> = self.policies.into_keys().collect();
        orphaned.sort();
        if let Some(kind) = orphaned.first().copied() {
            return Err(BuildError::InvalidPolicy {
                kind,
                reason: "no handler registered for this kind".to_string(),
            });
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let writer = StoreWriter::new(
            Arc::clone(&store),
            self.config.store_retry.attempts,
            self.config.store_retry_backoff(),
        );

        Ok(QueueManager::from_engine(Engine {
            store,
            writer,
            broker,
            registry: self.registry,
            clock,
            ids,
            codec: PayloadCodec,
            config: self.config,
            limits,
            running: AtomicBool::new(false),
        }))
    }
}

impl Default for QueueManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
