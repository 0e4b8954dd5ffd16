//! In-process backend.

use super::Backend;
use crate::config::BackendKind;
use crate::error::CacheResult;
use crate::key::EntryId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Payloads kept in a map; writes cannot fail.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<EntryId, String>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payloads.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put(&self, id: EntryId, payload: String, _ttl: Duration) -> CacheResult<()> {
        self.data.write().await.insert(id, payload);
        Ok(())
    }

    async fn get(&self, id: EntryId) -> CacheResult<Option<String>> {
        Ok(self.data.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: EntryId) -> CacheResult<()> {
        self.data.write().await.remove(&id);
        Ok(())
    }

    async fn delete_many(&self, ids: &[EntryId]) -> CacheResult<()> {
        let mut data = self.data.write().await;
        for id in ids {
            data.remove(id);
        }
        Ok(())
    }
}
