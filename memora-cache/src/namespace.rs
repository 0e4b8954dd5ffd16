//! Cache namespaces and their process-wide uniqueness.

use crate::error::{CacheError, CacheResult};
use memora_log::{debug, info};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;

static CLAIMED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Reduce a namespace to characters that are safe as a directory name and as
/// a remote key prefix.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`, which also rules out `..`
/// and absolute paths.
pub fn sanitize(raw: &str) -> CacheResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CacheError::Config("cache namespace is empty".to_string()));
    }
    Ok(trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect())
}

/// Exclusive claim on a namespace, released on drop.
#[derive(Debug)]
pub struct NamespaceLease {
    name: String,
}

impl NamespaceLease {
    /// Sanitize `raw` and claim it for this process.
    ///
    /// Fails with [`CacheError::NamespaceInUse`] while another lease on the
    /// same sanitized name is alive.
    pub fn claim(raw: &str) -> CacheResult<Self> {
        let name = sanitize(raw)?;
        let mut claimed = CLAIMED.lock();
        if !claimed.insert(name.clone()) {
            return Err(CacheError::NamespaceInUse(name));
        }
        info!("Cache namespace {} registered", name);
        Ok(Self { name })
    }

    /// The sanitized namespace.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamespaceLease {
    fn drop(&mut self) {
        CLAIMED.lock().remove(&self.name);
        debug!("Cache namespace {} released", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("users").unwrap(), "users");
        assert_eq!(sanitize(" query/cache ").unwrap(), "query_cache");
        assert_eq!(sanitize("../etc").unwrap(), "___etc");
        assert_eq!(sanitize("a:b.c").unwrap(), "a_b_c");
        assert!(sanitize("   ").is_err());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let lease = NamespaceLease::claim("ns-test-exclusive").unwrap();
        assert_eq!(lease.name(), "ns-test-exclusive");

        let err = NamespaceLease::claim("ns-test-exclusive").unwrap_err();
        assert!(matches!(err, CacheError::NamespaceInUse(ref n) if n == "ns-test-exclusive"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_collision_after_sanitizing() {
        let _lease = NamespaceLease::claim("ns/test/sanitized").unwrap();
        assert!(NamespaceLease::claim("ns.test.sanitized").is_err());
    }

    #[test]
    fn test_drop_releases() {
        let lease = NamespaceLease::claim("ns-test-release").unwrap();
        drop(lease);
        assert!(NamespaceLease::claim("ns-test-release").is_ok());
    }
}
