//! The cache instance: lookups, coalesced computation, storage and clears.

use crate::backend::{Backend, Backends};
use crate::coalesce::{self, CallOnDrop, Outcome};
use crate::config::{BackendKind, CacheConfig, CacheOptions};
use crate::error::{CacheError, CacheResult, SharedError};
use crate::expiry::ExpiryScheduler;
use crate::key::EntryId;
use crate::namespace::NamespaceLease;
use crate::store::{Entry, EntryStore, Hit, Lookup, StoreStats};
use crate::tags::merge_tags;
use futures::future::join_all;
use memora_log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

#[cfg(feature = "broadcast")]
use crate::broadcast::{BroadcastMessage, Broadcaster};

/// A computed value together with the tags of the resources it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Computed<T> {
    pub value: T,
    pub tags: Vec<String>,
}

impl<T> Computed<T> {
    /// A value with no tags.
    pub fn new(value: T) -> Self {
        Self {
            value,
            tags: Vec::new(),
        }
    }

    /// Add tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Counts describing a cache instance at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Distinct keys seen
    pub keys: usize,
    /// Entries recorded
    pub entries: usize,
    /// Computations in flight
    pub pending: usize,
    /// Tag buckets
    pub tags: usize,
    /// Expiry timers not fired yet
    pub timers: usize,
}

/// Handle to one cache instance. Cloning shares the instance.
///
/// # Examples
///
/// ```no_run
/// use memora_cache::*;
///
/// # async fn example() -> CacheResult<()> {
/// let cache = CacheManager::new(CacheConfig::new("users")).await?;
///
/// let names: Vec<String> = cache
///     .get_or_compute("User.names:{}", CacheOptions::seconds(30).with_tag("User"), || async {
///         Ok::<_, std::io::Error>(vec!["Alice".to_string(), "Bob".to_string()])
///     })
///     .await?;
///
/// cache.clear_by_tag("User").await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    lease: NamespaceLease,
    config: CacheConfig,
    backends: Backends,
    state: Mutex<EntryStore>,
    expiry: ExpiryScheduler,
    #[cfg(feature = "broadcast")]
    broadcaster: Option<Broadcaster>,
}

enum Step {
    Fetch(Hit),
    Wait(coalesce::Pending),
    Lead {
        id: EntryId,
        resolver: coalesce::Resolver,
        pending: coalesce::Pending,
    },
}

impl CacheManager {
    /// Create a cache instance and open the backends its config enables.
    ///
    /// Fails with [`CacheError::NamespaceInUse`] if another live instance in
    /// this process has the same sanitized namespace.
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        let lease = NamespaceLease::claim(&config.namespace)?;
        let backends = Backends::open(&config, lease.name()).await?;
        Self::assemble(lease, config, backends).await
    }

    /// Create a cache instance over already opened backends.
    pub async fn with_backends(config: CacheConfig, backends: Backends) -> CacheResult<Self> {
        let lease = NamespaceLease::claim(&config.namespace)?;
        Self::assemble(lease, config, backends).await
    }

    async fn assemble(
        lease: NamespaceLease,
        config: CacheConfig,
        backends: Backends,
    ) -> CacheResult<Self> {
        backends.get(config.default_backend)?;

        #[cfg(feature = "broadcast")]
        let broadcaster = match &config.broadcast {
            Some(broadcast) => Some(Broadcaster::bind(broadcast).await?),
            None => None,
        };
        #[cfg(not(feature = "broadcast"))]
        if config.broadcast.is_some() {
            return Err(CacheError::Config(
                "broadcast is configured but the `broadcast` feature is disabled".to_string(),
            ));
        }

        let inner = Arc::new(CacheInner {
            lease,
            config,
            backends,
            state: Mutex::new(EntryStore::new()),
            expiry: ExpiryScheduler::new(),
            #[cfg(feature = "broadcast")]
            broadcaster,
        });

        #[cfg(feature = "broadcast")]
        if let Some(broadcaster) = &inner.broadcaster {
            let weak = Arc::downgrade(&inner);
            broadcaster.listen(move |message| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => {
                            inner.apply_remote(message).await;
                            true
                        }
                        None => false,
                    }
                }
            });
        }

        Ok(Self { inner })
    }

    /// The sanitized namespace.
    pub fn namespace(&self) -> &str {
        self.inner.lease.name()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Options using the configured default TTL.
    pub fn default_options(&self) -> CacheOptions {
        self.inner.config.default_options()
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Concurrent calls for the same key share one computation. `compute`
    /// runs on its own task and always completes, even if every caller stops
    /// waiting. A failure is returned to every waiting caller as the same
    /// [`CacheError::Computation`] and nothing is stored.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: impl AsRef<str>,
        options: CacheOptions,
        compute: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.get_or_compute_tagged(key, options, move || async move {
            compute().await.map(Computed::new)
        })
        .await
    }

    /// Like [`get_or_compute`](Self::get_or_compute), with the computation
    /// declaring the tags of what it read.
    ///
    /// Computed tags are merged with `options.tags`.
    pub async fn get_or_compute_tagged<T, E, F, Fut>(
        &self,
        key: impl AsRef<str>,
        options: CacheOptions,
        compute: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Computed<T>, E>> + Send + 'static,
    {
        let key = key.as_ref();
        let mut compute = Some(compute);

        loop {
            let step = {
                let mut state = self.inner.state.lock();
                match state.lookup_or_register(key, Instant::now()) {
                    Lookup::Fresh(hit) => Step::Fetch(hit),
                    Lookup::Pending(pending) => Step::Wait(pending),
                    Lookup::Lead {
                        id,
                        resolver,
                        pending,
                    } => Step::Lead {
                        id,
                        resolver,
                        pending,
                    },
                }
            };

            match step {
                Step::Fetch(hit) => {
                    if let Some(payload) = self.inner.fetch(hit).await {
                        match decode(&payload) {
                            Ok(value) => {
                                trace!("Cache hit for {}", key);
                                return Ok(value);
                            }
                            Err(e) => {
                                debug!("Dropping undecodable entry for {}: {}", key, e);
                                self.inner.forget(hit).await;
                            }
                        }
                    }
                }
                Step::Wait(pending) => {
                    debug!("Waiting on in-flight computation for {}", key);
                    let payload = coalesce::wait(pending).await?;
                    return decode(&payload);
                }
                Step::Lead {
                    id,
                    resolver,
                    pending,
                } => {
                    // A lead step only happens once per call: it always returns.
                    let Some(compute) = compute.take() else {
                        return Err(CacheError::Aborted);
                    };
                    trace!("Cache miss for {}, computing", key);
                    self.inner
                        .spawn_computation(id, resolver, options.clone(), compute);
                    let payload = coalesce::wait(pending).await?;
                    return decode(&payload);
                }
            }
        }
    }

    /// The cached value for `key` if it is fresh. Never waits on a computation.
    ///
    /// An entry that cannot be read or decoded is reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: impl AsRef<str>) -> CacheResult<Option<T>> {
        let key = key.as_ref();
        let hit = self.inner.state.lock().peek(key, Instant::now());
        let Some(hit) = hit else {
            return Ok(None);
        };
        let Some(payload) = self.inner.fetch(hit).await else {
            return Ok(None);
        };
        match decode(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!("Entry for {} does not decode as requested: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Store `value` under `key` without computing anything.
    ///
    /// A zero TTL stores nothing. Unlike computed results, a failed backend
    /// write is returned to the caller.
    pub async fn set<T: Serialize>(
        &self,
        key: impl AsRef<str>,
        value: &T,
        options: CacheOptions,
    ) -> CacheResult<()> {
        let payload = encode(value)?;
        let id = self.inner.state.lock().to_id(key.as_ref());
        if !options.persists() {
            return Ok(());
        }
        let tags = merge_tags([options.tags.as_slice()]);
        self.inner.store(id, payload, &options, tags).await
    }

    /// Remove the entry for `key` here and, if broadcasting, on peers.
    pub async fn clear(&self, key: impl AsRef<str>) {
        let key = key.as_ref();
        self.inner.clear_local(key).await;

        #[cfg(feature = "broadcast")]
        self.inner.broadcast(BroadcastMessage::clear(key)).await;
    }

    /// Remove every entry tagged with `tag` here and, if broadcasting, on peers.
    pub async fn clear_by_tag(&self, tag: impl AsRef<str>) {
        let tag = tag.as_ref();
        self.inner.clear_tag_local(tag).await;

        #[cfg(feature = "broadcast")]
        self.inner.broadcast(BroadcastMessage::clear_tag(tag)).await;
    }

    /// Identifiers of the live entries tagged with `tag`.
    pub fn tag_members(&self, tag: impl AsRef<str>) -> Vec<EntryId> {
        self.inner.state.lock().tag_members(tag.as_ref())
    }

    pub fn stats(&self) -> CacheStats {
        let StoreStats {
            keys,
            entries,
            pending,
            tags,
        } = self.inner.state.lock().stats();
        CacheStats {
            keys,
            entries,
            pending,
            tags,
            timers: self.inner.expiry.armed(),
        }
    }

    /// Whether a broadcast listener is running.
    pub fn is_listening(&self) -> bool {
        #[cfg(feature = "broadcast")]
        if let Some(broadcaster) = &self.inner.broadcaster {
            return broadcaster.is_listening();
        }
        false
    }

    /// Address of the broadcast socket, if broadcasting.
    #[cfg(feature = "broadcast")]
    pub fn broadcast_addr(&self) -> Option<std::net::SocketAddr> {
        self.inner
            .broadcaster
            .as_ref()
            .and_then(|b| b.local_addr().ok())
    }

    /// Stop receiving peer invalidations.
    ///
    /// Local operations keep working and local clears are still sent. The
    /// namespace is released once every handle is dropped.
    pub fn shutdown(&self) {
        #[cfg(feature = "broadcast")]
        if let Some(broadcaster) = &self.inner.broadcaster {
            broadcaster.shutdown();
        }
    }
}

impl CacheInner {
    /// Payload of a fresh entry. A read error or a missing payload forgets
    /// the entry and reports it absent.
    async fn fetch(&self, hit: Hit) -> Option<Arc<str>> {
        let result = match self.backends.get(hit.backend) {
            Ok(backend) => backend.get(hit.id).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(Some(payload)) => Some(Arc::from(payload)),
            Ok(None) => {
                debug!("Entry {} missing from {} backend", hit.id, hit.backend);
                self.state.lock().forget(hit.id, hit.generation);
                None
            }
            Err(e) => {
                debug!("Reading entry {} from {} backend failed: {}", hit.id, hit.backend, e);
                self.forget(hit).await;
                None
            }
        }
    }

    async fn forget(&self, hit: Hit) {
        let removed = self.state.lock().forget(hit.id, hit.generation);
        if let Some(entry) = removed {
            self.delete_payloads(vec![(hit.id, entry)]).await;
        }
    }

    /// Run `compute` on its own task, store a successful result and resolve
    /// everyone waiting on `id`.
    fn spawn_computation<T, E, F, Fut>(
        self: &Arc<Self>,
        id: EntryId,
        resolver: coalesce::Resolver,
        options: CacheOptions,
        compute: F,
    ) where
        T: Serialize + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Computed<T>, E>> + Send + 'static,
    {
        let inner = self.clone();

        tokio::spawn(async move {
            // Also runs if `compute` panics, so later callers can retry.
            let settle = {
                let inner = inner.clone();
                CallOnDrop::new(move || inner.state.lock().settle(id))
            };

            let outcome: Outcome = match compute().await {
                Ok(computed) => match encode(&computed.value) {
                    Ok(payload) => {
                        if options.persists() {
                            let tags =
                                merge_tags([options.tags.as_slice(), computed.tags.as_slice()]);
                            if let Err(e) = inner.store(id, payload.clone(), &options, tags).await {
                                warn!("Computed value for entry {} was not stored: {}", id, e);
                            }
                        }
                        Ok(payload)
                    }
                    Err(e) => Err(Arc::new(e) as SharedError),
                },
                Err(e) => Err(Arc::new(e) as SharedError),
            };

            drop(settle);
            // Nobody waiting is fine.
            let _ = resolver.send(outcome);
        });
    }

    /// Write a payload and record its entry.
    ///
    /// The entry is only recorded after the backend write succeeded. A failed
    /// write removes whatever entry `id` had before.
    async fn store(
        self: &Arc<Self>,
        id: EntryId,
        payload: Arc<str>,
        options: &CacheOptions,
        tags: Vec<String>,
    ) -> CacheResult<()> {
        let kind = options.backend.unwrap_or(self.config.default_backend);
        let written = match self.backends.get(kind) {
            Ok(backend) => backend.put(id, payload.to_string(), options.ttl).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let stale = self.state.lock().remove(id);
            if let Some(entry) = stale {
                self.delete_payloads(vec![(id, entry)]).await;
            }
            return Err(e);
        }

        let committed = self
            .state
            .lock()
            .commit(id, kind, options.ttl, tags, Instant::now());

        if let Some(previous) = committed.replaced
            && previous.backend != kind
        {
            self.delete_payloads(vec![(id, previous)]).await;
        }

        let weak = Arc::downgrade(self);
        let generation = committed.generation;
        self.expiry.arm(committed.expires_at, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.expire(id, generation).await;
            }
        });

        trace!("Stored entry {} on {} backend", id, kind);
        Ok(())
    }

    async fn expire(&self, id: EntryId, generation: u64) {
        let removed = self.state.lock().forget(id, generation);
        if let Some(entry) = removed {
            trace!("Entry {} expired", id);
            self.delete_payloads(vec![(id, entry)]).await;
        }
    }

    async fn clear_local(&self, key: &str) {
        let removed = self.state.lock().remove_key(key);
        if let Some(removed) = removed {
            debug!("Cleared {}", key);
            self.delete_payloads(vec![removed]).await;
        }
    }

    async fn clear_tag_local(&self, tag: &str) {
        let removed = self.state.lock().take_tag(tag);
        if !removed.is_empty() {
            debug!("Cleared {} entries tagged {}", removed.len(), tag);
            self.delete_payloads(removed).await;
        }
    }

    /// Best-effort removal of payloads; the entries are already gone.
    async fn delete_payloads(&self, removed: Vec<(EntryId, Entry)>) {
        let mut by_backend: HashMap<BackendKind, Vec<EntryId>> = HashMap::new();
        for (id, entry) in removed {
            by_backend.entry(entry.backend).or_default().push(id);
        }

        let deletions = by_backend.into_iter().filter_map(|(kind, ids)| {
            let backend: &Arc<dyn Backend> = self.backends.get(kind).ok()?;
            Some(async move {
                if let Err(e) = backend.delete_many(&ids).await {
                    debug!("Deleting {} entries from {} backend failed: {}", ids.len(), kind, e);
                }
            })
        });
        join_all(deletions).await;
    }

    #[cfg(feature = "broadcast")]
    async fn broadcast(&self, message: BroadcastMessage) {
        if let Some(broadcaster) = &self.broadcaster
            && let Err(e) = broadcaster.send(&message).await
        {
            warn!("Failed to broadcast {:?}: {}", message, e);
        }
    }

    /// Apply a peer's invalidation without sending it on.
    #[cfg(feature = "broadcast")]
    async fn apply_remote(&self, message: BroadcastMessage) {
        match message {
            BroadcastMessage::Clear { key } => self.clear_local(&key).await,
            BroadcastMessage::ClearTag { tag } => self.clear_tag_local(&tag).await,
        }
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Arc<str>, CacheError> {
    serde_json::to_string(value)
        .map(Arc::from)
        .map_err(|e| CacheError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(payload: &str) -> CacheResult<T> {
    serde_json::from_str(payload).map_err(|e| CacheError::Deserialization(e.to_string()))
}
