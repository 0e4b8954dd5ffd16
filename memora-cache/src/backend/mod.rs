//! Physical storage for cached values.
//!
//! A backend only moves serialized payloads around. Freshness, tags and
//! coalescing are decided by the entry store; a backend never sees cache keys,
//! only [`EntryId`]s.

mod filesystem;
mod memory;
#[cfg(feature = "redis")]
mod remote;

pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use remote::RedisBackend;

use crate::config::{BackendKind, CacheConfig};
use crate::error::{CacheError, CacheResult};
use crate::key::EntryId;
use async_trait::async_trait;
use futures::future::join_all;
use memora_log::debug;
use std::sync::Arc;
use std::time::Duration;

/// Storage backend trait.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which kind of storage this is.
    fn kind(&self) -> BackendKind;

    /// Store the JSON payload for an entry.
    ///
    /// `ttl` is advisory; backends with server-side expiry use it, others
    /// rely on the expiry scheduler.
    async fn put(&self, id: EntryId, payload: String, ttl: Duration) -> CacheResult<()>;

    /// Fetch the payload for an entry.
    ///
    /// Returns `Ok(None)` when the payload is gone, for example evicted by a
    /// remote server.
    async fn get(&self, id: EntryId) -> CacheResult<Option<String>>;

    /// Remove the payload for an entry. Removing a missing payload succeeds.
    async fn delete(&self, id: EntryId) -> CacheResult<()>;

    /// Remove several payloads concurrently.
    ///
    /// Every id is attempted even if some deletes fail; the first failure is
    /// returned after all of them have finished.
    async fn delete_many(&self, ids: &[EntryId]) -> CacheResult<()> {
        let results = join_all(ids.iter().map(|id| self.delete(*id))).await;

        let mut first_error = None;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                debug!("Deleting entry {} from {} backend failed: {}", id, self.kind(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// The backends available to one cache instance.
pub struct Backends {
    memory: Arc<dyn Backend>,
    filesystem: Option<Arc<dyn Backend>>,
    remote: Option<Arc<dyn Backend>>,
}

impl Backends {
    /// Open every backend enabled in `config` for the sanitized `namespace`.
    ///
    /// The filesystem directory is emptied; entries from a previous process
    /// are never trusted because identifiers are not stable across restarts.
    pub async fn open(config: &CacheConfig, namespace: &str) -> CacheResult<Self> {
        let filesystem = match &config.filesystem_root {
            Some(root) => {
                let backend = FilesystemBackend::open(root.join(namespace)).await?;
                Some(Arc::new(backend) as Arc<dyn Backend>)
            }
            None => None,
        };

        let remote = match &config.redis_url {
            #[cfg(feature = "redis")]
            Some(url) => {
                let backend = RedisBackend::connect(url, namespace).await?;
                Some(Arc::new(backend) as Arc<dyn Backend>)
            }
            #[cfg(not(feature = "redis"))]
            Some(_) => {
                return Err(CacheError::Config(
                    "redis_url is set but the `redis` feature is disabled".to_string(),
                ));
            }
            None => None,
        };

        Ok(Self {
            memory: Arc::new(MemoryBackend::new()),
            filesystem,
            remote,
        })
    }

    /// Memory-only set of backends.
    pub fn memory_only() -> Self {
        Self {
            memory: Arc::new(MemoryBackend::new()),
            filesystem: None,
            remote: None,
        }
    }

    /// Replace the backend for `backend.kind()`.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        match backend.kind() {
            BackendKind::Memory => self.memory = backend,
            BackendKind::Filesystem => self.filesystem = Some(backend),
            BackendKind::Remote => self.remote = Some(backend),
        }
        self
    }

    /// The backend for `kind`, if configured.
    pub fn get(&self, kind: BackendKind) -> CacheResult<&Arc<dyn Backend>> {
        let backend = match kind {
            BackendKind::Memory => Some(&self.memory),
            BackendKind::Filesystem => self.filesystem.as_ref(),
            BackendKind::Remote => self.remote.as_ref(),
        };
        backend.ok_or(CacheError::BackendUnavailable(kind))
    }
}
