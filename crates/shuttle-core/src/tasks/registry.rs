//! TaskRegistry - Handler の登録と管理
//!
//! Built once by the builder, read-only while the manager runs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{RegistryError, TaskKind};
use crate::queue::TaskPolicy;

use super::handler::TaskHandler;

/// Handler and policy for one task kind.
#[derive(Clone)]
pub struct RegistryEntry {
    pub handler: Arc<dyn TaskHandler>,
    pub policy: TaskPolicy,
}

#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<TaskKind, RegistryEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`. A second registration for the same kind
    /// is an error.
    pub fn register(
        &mut self,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
        policy: TaskPolicy,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.entries.insert(kind, RegistryEntry { handler, policy });
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<&RegistryEntry> {
        self.entries.get(&kind)
    }

    pub fn resolve(&self, kind: TaskKind) -> Result<&RegistryEntry, RegistryError> {
        self.get(kind).ok_or(RegistryError::NotRegistered(kind))
    }

    pub fn contains(&self, kind: TaskKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Registered kinds in declaration order of [`TaskKind`].
    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.entries.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskKind, &RegistryEntry)> {
        self.entries.iter().map(|(kind, entry)| (*kind, entry))
    }

    pub(crate) fn set_policy(&mut self, kind: TaskKind, policy: TaskPolicy) {
        if let Some(entry) = self.entries.get_mut(&kind) {
            entry.policy = policy;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
