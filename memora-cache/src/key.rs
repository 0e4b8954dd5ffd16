//! Cache keys and the key-to-identifier index.

use crate::error::{CacheError, CacheResult};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Compact identifier for a cache key, stable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Grow-only map from cache keys to [`EntryId`]s.
///
/// Identifiers are issued from a counter starting at 1. The counter wraps
/// back to 1 after `u64::MAX`; no process lives long enough to see a reused id.
#[derive(Debug)]
pub struct KeyIndex {
    ids: HashMap<String, EntryId>,
    next: u64,
}

impl Default for KeyIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            next: 1,
        }
    }

    /// Identifier for `key`, allocating one on first sight.
    pub fn to_id(&mut self, key: &str) -> EntryId {
        if let Some(id) = self.ids.get(key) {
            return *id;
        }
        let id = EntryId(self.next);
        self.next = self.next.checked_add(1).unwrap_or(1);
        self.ids.insert(key.to_string(), id);
        id
    }

    /// Identifier for `key` if it was seen before.
    pub fn lookup(&self, key: &str) -> Option<EntryId> {
        self.ids.get(key).copied()
    }

    /// Number of distinct keys seen.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no key was seen yet.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A caller-built cache key.
///
/// Keys are opaque to the engine. [`CacheKey::build`] is the canonical way to
/// key a query: `resource.operation:<json args>` with object fields sorted, so
/// two argument values that serialize equal always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already canonical key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build `resource.operation:<canonical json of args>`.
    ///
    /// # Examples
    ///
    /// ```
    /// use memora_cache::CacheKey;
    /// use serde_json::json;
    ///
    /// let a = CacheKey::build("User", "findAll", &json!({"where": {"age": 30, "name": "Jane"}})).unwrap();
    /// let b = CacheKey::build("User", "findAll", &json!({"where": {"name": "Jane", "age": 30}})).unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str(), r#"User.findAll:{"where":{"age":30,"name":"Jane"}}"#);
    /// ```
    pub fn build<A: Serialize + ?Sized>(
        resource: &str,
        operation: &str,
        args: &A,
    ) -> CacheResult<Self> {
        // Going through `Value` sorts object keys.
        let value = serde_json::to_value(args)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        Ok(Self(format!("{}.{}:{}", resource, operation, value)))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the key string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_id_is_idempotent() {
        let mut index = KeyIndex::new();
        let a = index.to_id("User.findAll:{}");
        let b = index.to_id("Post.findAll:{}");
        assert_ne!(a, b);
        assert_eq!(index.to_id("User.findAll:{}"), a);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut index = KeyIndex::new();
        let ids: Vec<u64> = (0..5).map(|i| index.to_id(&format!("k{}", i)).get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_counter_wraps_to_one() {
        let mut index = KeyIndex {
            ids: HashMap::new(),
            next: u64::MAX,
        };
        assert_eq!(index.to_id("last").get(), u64::MAX);
        assert_eq!(index.to_id("first-again").get(), 1);
    }

    #[test]
    fn test_lookup_does_not_allocate() {
        let mut index = KeyIndex::new();
        assert_eq!(index.lookup("missing"), None);
        assert!(index.is_empty());
        let id = index.to_id("present");
        assert_eq!(index.lookup("present"), Some(id));
    }

    #[test]
    fn test_build_sorts_object_keys() {
        let key = CacheKey::build("Post", "count", &json!({"b": 1, "a": [2, {"z": 0, "y": 1}]}))
            .unwrap();
        assert_eq!(key.as_str(), r#"Post.count:{"a":[2,{"y":1,"z":0}],"b":1}"#);
    }

    #[test]
    fn test_build_with_struct_args() {
        #[derive(Serialize)]
        struct Args {
            limit: u32,
            offset: u32,
        }
        let key = CacheKey::build("User", "findAll", &Args { limit: 10, offset: 0 }).unwrap();
        assert_eq!(key.to_string(), r#"User.findAll:{"limit":10,"offset":0}"#);
    }
}
