//! Append-only store of stage outputs for a single run.
//!
//! Each key is written exactly once, by the stage that declares it as its
//! output. Later stages read entries but never modify them.

use carousel_core::{ContextEntry, ContextKey, StageId};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    entries: Vec<ContextEntry>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage output. Fails if the key already holds a value.
    pub fn insert(
        &mut self,
        stage: StageId,
        key: ContextKey,
        payload: serde_json::Value,
    ) -> Result<&ContextEntry> {
        if let Some(existing) = self.entry(&key) {
            return Err(OrchestratorError::ContextOverwrite {
                key,
                existing: existing.stage,
            });
        }

        debug!(stage = %stage, key = %key, "Context entry recorded");
        self.entries.push(ContextEntry::new(stage, key, payload));
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn entry(&self, key: &ContextKey) -> Option<&ContextEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    pub fn get(&self, key: &ContextKey) -> Option<&serde_json::Value> {
        self.entry(key).map(|e| &e.payload)
    }

    /// Decode an entry into its typed payload.
    pub fn get_as<T: DeserializeOwned>(&self, key: &ContextKey) -> Option<Result<T>> {
        self.get(key)
            .map(|value| serde_json::from_value(value.clone()).map_err(OrchestratorError::from))
    }

    pub fn contains(&self, key: &ContextKey) -> bool {
        self.entry(key).is_some()
    }

    /// First key in `keys` that has no entry yet.
    pub fn first_missing<'a>(&self, keys: &'a [ContextKey]) -> Option<&'a ContextKey> {
        keys.iter().find(|k| !self.contains(k))
    }

    /// Entries in the order they were written.
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
