//! Authoritative record of which entries exist and where their values live.
//!
//! The store is plain data guarded by one synchronous lock in the manager.
//! Every method runs to completion without awaiting, which is what makes
//! "check absent, then register pending" a single step.

use crate::coalesce::{self, Pending, Resolver};
use crate::config::BackendKind;
use crate::key::{EntryId, KeyIndex};
use crate::tags::TagIndex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// A stored entry. The value itself lives in the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Backend holding the payload
    pub backend: BackendKind,
    /// The entry is fresh strictly before this instant
    pub expires_at: Instant,
    /// Tags the entry was stored with
    pub tags: Vec<String>,
    /// Distinguishes successive entries stored under the same id
    pub generation: u64,
}

impl Entry {
    /// Whether the entry is still fresh at `now`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A fresh entry found by a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub id: EntryId,
    pub backend: BackendKind,
    pub generation: u64,
}

/// Result of [`EntryStore::lookup_or_register`].
pub enum Lookup {
    /// A fresh entry exists; its payload has to be fetched from the backend.
    Fresh(Hit),
    /// Another caller is computing this key.
    Pending(Pending),
    /// Nothing was stored or pending; the caller now owns the computation.
    Lead {
        id: EntryId,
        resolver: Resolver,
        pending: Pending,
    },
}

/// What [`EntryStore::commit`] recorded.
#[derive(Debug)]
pub struct Committed {
    pub generation: u64,
    pub expires_at: Instant,
    /// The entry this one replaced, if any
    pub replaced: Option<Entry>,
}

/// Counts describing the store at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Distinct keys seen
    pub keys: usize,
    /// Entries recorded, fresh or awaiting their expiry timer
    pub entries: usize,
    /// Computations in flight
    pub pending: usize,
    /// Tag buckets
    pub tags: usize,
}

/// Entries, in-flight computations and tag buckets of one cache instance.
#[derive(Default)]
pub struct EntryStore {
    keys: KeyIndex,
    entries: HashMap<EntryId, Entry>,
    pending: HashMap<EntryId, Pending>,
    tags: TagIndex,
    generation: u64,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier for `key`, allocating one on first sight.
    pub fn to_id(&mut self, key: &str) -> EntryId {
        self.keys.to_id(key)
    }

    /// Fresh entry for `key`, without allocating an id or waiting.
    pub fn peek(&self, key: &str, now: Instant) -> Option<Hit> {
        let id = self.keys.lookup(key)?;
        self.fresh(id, now)
    }

    fn fresh(&self, id: EntryId, now: Instant) -> Option<Hit> {
        self.entries
            .get(&id)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| Hit {
                id,
                backend: entry.backend,
                generation: entry.generation,
            })
    }

    /// Classify `key` as fresh, pending or absent.
    ///
    /// When absent, a pending handle is registered before returning and the
    /// caller receives its resolver. Until the pending handle is removed,
    /// every other lookup of the same key returns [`Lookup::Pending`].
    pub fn lookup_or_register(&mut self, key: &str, now: Instant) -> Lookup {
        let id = self.keys.to_id(key);

        if let Some(hit) = self.fresh(id, now) {
            return Lookup::Fresh(hit);
        }

        if let Some(pending) = self.pending.get(&id) {
            return Lookup::Pending(pending.clone());
        }

        let (resolver, pending) = coalesce::channel();
        self.pending.insert(id, pending.clone());
        Lookup::Lead {
            id,
            resolver,
            pending,
        }
    }

    /// Remove the pending handle for `id`.
    pub fn settle(&mut self, id: EntryId) {
        self.pending.remove(&id);
    }

    /// Record an entry whose payload was just written to `backend`, and tag it.
    pub fn commit(
        &mut self,
        id: EntryId,
        backend: BackendKind,
        ttl: Duration,
        tags: Vec<String>,
        now: Instant,
    ) -> Committed {
        self.generation += 1;
        let generation = self.generation;
        let expires_at = now + ttl;

        for tag in &tags {
            self.tags.attach(tag, id);
        }

        let replaced = self.entries.insert(
            id,
            Entry {
                backend,
                expires_at,
                tags,
                generation,
            },
        );

        Committed {
            generation,
            expires_at,
            replaced,
        }
    }

    /// Remove the entry for `id` only if it is still the given generation.
    pub fn forget(&mut self, id: EntryId, generation: u64) -> Option<Entry> {
        match self.entries.get(&id) {
            Some(entry) if entry.generation == generation => self.entries.remove(&id),
            _ => None,
        }
    }

    /// Remove the entry for `id`, whatever its generation.
    pub fn remove(&mut self, id: EntryId) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// Remove the entry for `key`. Keys never seen are ignored.
    pub fn remove_key(&mut self, key: &str) -> Option<(EntryId, Entry)> {
        let id = self.keys.lookup(key)?;
        self.entries.remove(&id).map(|entry| (id, entry))
    }

    /// Drop the bucket for `tag` and remove every entry still live in it.
    pub fn take_tag(&mut self, tag: &str) -> Vec<(EntryId, Entry)> {
        self.tags
            .take(tag)
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    /// Ids tagged with `tag` that still have an entry.
    pub fn tag_members(&self, tag: &str) -> Vec<EntryId> {
        self.tags
            .members(tag)
            .iter()
            .copied()
            .filter(|id| self.entries.contains_key(id))
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.keys.len(),
            entries: self.entries.len(),
            pending: self.pending.len(),
            tags: self.tags.len(),
        }
    }
}
