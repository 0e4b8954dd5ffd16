//! Redis remote backend.

use super::Backend;
use crate::config::BackendKind;
use crate::error::{CacheError, CacheResult};
use crate::key::EntryId;
use async_trait::async_trait;
use memora_log::info;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;

/// Stores each payload under `<namespace>:<id>` with a server-side expiry.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisBackend {
    /// Connect to the server at `url`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use memora_cache::backend::RedisBackend;
    ///
    /// # async fn example() -> memora_cache::CacheResult<()> {
    /// let backend = RedisBackend::connect("redis://localhost:6379", "users").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: &str, namespace: &str) -> CacheResult<Self> {
        let client = Client::open(url).map_err(|e| CacheError::Config(e.to_string()))?;

        let connection = ConnectionManager::new(client).await?;

        info!("Remote cache connected for namespace {}", namespace);

        Ok(Self {
            connection,
            namespace: namespace.to_string(),
        })
    }

    /// The remote key for an entry.
    pub fn build_key(&self, id: EntryId) -> String {
        remote_key(&self.namespace, id)
    }
}

fn remote_key(namespace: &str, id: EntryId) -> String {
    format!("{}:{}", namespace, id)
}

/// Server-side expiry in whole seconds, never zero.
fn expiry_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl Backend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn put(&self, id: EntryId, payload: String, ttl: Duration) -> CacheResult<()> {
        let key = self.build_key(id);
        let mut conn = self.connection.clone();
        let _: () = conn.set_ex(&key, payload, expiry_seconds(ttl)).await?;
        Ok(())
    }

    async fn get(&self, id: EntryId) -> CacheResult<Option<String>> {
        let key = self.build_key(id);
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(&key).await?;
        Ok(value)
    }

    async fn delete(&self, id: EntryId) -> CacheResult<()> {
        let key = self.build_key(id);
        let mut conn = self.connection.clone();
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyIndex;

    #[test]
    fn test_remote_key_layout() {
        let id = KeyIndex::new().to_id("User.findAll:{}");
        assert_eq!(remote_key("users", id), "users:1");
    }

    #[test]
    fn test_expiry_rounds_up() {
        assert_eq!(expiry_seconds(Duration::from_secs(60)), 60);
        assert_eq!(expiry_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(expiry_seconds(Duration::from_millis(10)), 1);
    }

    // Requires a running Redis: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_redis_roundtrip() {
        let backend = RedisBackend::connect("redis://localhost:6379", "memora-test")
            .await
            .unwrap();
        let id = KeyIndex::new().to_id("k");

        backend.put(id, r#"{"a":1}"#.into(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(backend.get(id).await.unwrap().as_deref(), Some(r#"{"a":1}"#));

        backend.delete(id).await.unwrap();
        assert_eq!(backend.get(id).await.unwrap(), None);
    }
}
