//! Module registry
//!
//! Process-wide table from a stable module identity to the live
//! module instance. Asynchronous execution contexts (scheduled-job
//! firings, watcher threads) only carry the identity string, and use
//! the registry to find their way back to the module that owns the
//! work. Entries are never removed during a run; re-registration for
//! the same identity overwrites.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::module::ImporterModule;

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<ImporterModule>>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its identity, replacing any prior entry.
    pub fn register(&self, id: &str, module: Arc<ImporterModule>) {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        table.insert(id.to_string(), module);
    }

    /// Resolve an identity to its live module.
    pub fn resolve(&self, id: &str) -> Option<Arc<ImporterModule>> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table.get(id).cloned()
    }

    /// All registered identities, for status reporting.
    pub fn ids(&self) -> Vec<String> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = table.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
