//! Result caching for expensive asynchronous computations.
//!
//! A computation is identified by a string key. The cache returns the stored
//! value while it is fresh, runs at most one computation per key at a time,
//! expires entries after their TTL, and invalidates them by key, by tag, or
//! through a cascade graph of resources.
//!
//! # Features
//!
//! - `redis` - Remote backend on a Redis server (enabled by default)
//! - `broadcast` - UDP invalidation fan-out to sibling processes (enabled by default)
//! - **Stampede protection** - Concurrent callers share one computation
//! - **Pluggable persistence** - Memory, filesystem or remote per entry
//! - **Cascade invalidation** - Deletes follow `CASCADE` and `SET NULL` relations
//!
//! # Examples
//!
//! ## Coalesced computation
//!
//! ```no_run
//! use memora_cache::*;
//!
//! #[tokio::main]
//! async fn main() -> CacheResult<()> {
//!     let cache = CacheManager::new(CacheConfig::new("users")).await?;
//!     let key = CacheKey::build("User", "findAll", &serde_json::json!({"limit": 10}))?;
//!
//!     let users: Vec<String> = cache
//!         .get_or_compute_tagged(key, CacheOptions::seconds(60), || async {
//!             // Query the database here.
//!             Ok::<_, std::io::Error>(Computed::new(vec!["Alice".to_string()]).with_tags(["User"]))
//!         })
//!         .await?;
//!
//!     cache.clear_by_tag("User").await;
//!     Ok(())
//! }
//! ```
//!
//! ## Cascade invalidation
//!
//! ```no_run
//! use memora_cache::*;
//!
//! # async fn example(cache: CacheManager) -> CacheResult<()> {
//! let invalidator = Invalidator::from_schemas(
//!     &[
//!         ResourceSchema::new("User").cascade("Post"),
//!         ResourceSchema::new("Post").relation("Comment", OnDelete::SetNull),
//!     ],
//!     cache,
//! )?;
//!
//! invalidator.notify_deleted("User").await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Filesystem persistence and broadcast
//!
//! ```no_run
//! use memora_cache::*;
//!
//! # async fn example() -> CacheResult<()> {
//! let config = CacheConfig::new("reports")
//!     .with_filesystem("/var/cache/memora")
//!     .with_default_backend(BackendKind::Filesystem)
//!     .with_broadcast(BroadcastConfig::on_port(DEFAULT_BROADCAST_PORT));
//! let cache = CacheManager::new(config).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod coalesce;
pub mod config;
pub mod dependency;
pub mod error;
pub mod expiry;
pub mod invalidation;
pub mod key;
pub mod manager;
pub mod namespace;
pub mod store;
pub mod tags;

#[cfg(feature = "broadcast")]
pub mod broadcast;

pub use backend::{Backend, Backends, FilesystemBackend, MemoryBackend};
pub use config::{BackendKind, BroadcastConfig, CacheConfig, CacheOptions, DEFAULT_BROADCAST_PORT};
pub use dependency::{DependencyGraph, OnDelete, Relation, ResourceSchema};
pub use error::{CacheError, CacheResult, SharedError};
pub use expiry::{EXPIRY_GRACE, ExpiryScheduler};
pub use invalidation::Invalidator;
pub use key::{CacheKey, EntryId, KeyIndex};
pub use manager::{CacheManager, CacheStats, Computed};
pub use tags::TagIndex;

#[cfg(feature = "redis")]
pub use backend::RedisBackend;

#[cfg(feature = "broadcast")]
pub use broadcast::{BroadcastMessage, Broadcaster};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{BackendKind, BroadcastConfig, CacheConfig, CacheOptions};
    pub use crate::dependency::{DependencyGraph, OnDelete, ResourceSchema};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::invalidation::Invalidator;
    pub use crate::key::CacheKey;
    pub use crate::manager::{CacheManager, Computed};

    #[cfg(feature = "broadcast")]
    pub use crate::broadcast::BroadcastMessage;
}
