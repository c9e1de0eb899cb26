//! Persistence boundary
//!
//! The canonical product table is owned by an external store; the
//! pipeline only needs idempotent upsert/delete/lookup, used by the
//! diff and persist steps. [`MemoryStore`] is the in-process reference
//! implementation, used by default and under test.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use pdi_common::Result;

use crate::import::record::ProductRecord;

/// External product store. All operations must be safe to repeat on
/// retry (at-least-once delivery with idempotent upsert).
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn upsert(&self, record: &ProductRecord) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn find_by_key(&self, key: &str) -> Result<Option<ProductRecord>>;

    /// Every key currently stored. Used to expand a bulk delete-all
    /// instruction into explicit deletes.
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// In-memory store keyed by PLU.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, ProductRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn upsert(&self, record: &ProductRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(record.key().to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<ProductRecord>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }
}
