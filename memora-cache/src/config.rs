//! Cache configuration types.

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Port used for invalidation broadcasts when none is configured.
pub const DEFAULT_BROADCAST_PORT: u16 = 47474;

/// Where a cached value physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process memory
    Memory,
    /// One file per entry under the namespace directory
    Filesystem,
    /// One key per entry in a remote key-value store
    Remote,
}

impl BackendKind {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Filesystem => "filesystem",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> CacheResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "remote" | "redis" => Ok(Self::Remote),
            other => Err(CacheError::Config(format!("unknown backend: {}", other))),
        }
    }
}

/// UDP invalidation broadcast settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Local address the listener binds to
    pub bind_addr: IpAddr,
    /// Port shared by every sibling process
    pub port: u16,
    /// Destination of outgoing datagrams
    pub target: IpAddr,
    /// Destination port; defaults to `port`
    #[serde(default)]
    pub target_port: Option<u16>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_BROADCAST_PORT,
            target: IpAddr::V4(Ipv4Addr::BROADCAST),
            target_port: None,
        }
    }
}

impl BroadcastConfig {
    /// Broadcast on the given port to the limited broadcast address.
    pub fn on_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Send to a specific address instead of the limited broadcast address.
    pub fn with_target(mut self, target: IpAddr) -> Self {
        self.target = target;
        self
    }

    /// Send to a different port than the one listened on.
    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = Some(port);
        self
    }

    /// Bind the listener to a specific local address.
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Address outgoing datagrams are sent to.
    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.target, self.target_port.unwrap_or(self.port))
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace of this cache instance, unique within the process
    pub namespace: String,

    /// TTL used by callers that do not pick their own
    #[serde(with = "duration_secs", default = "default_ttl")]
    pub default_ttl: Duration,

    /// Backend used when a call does not choose one
    #[serde(default = "default_backend")]
    pub default_backend: BackendKind,

    /// Root directory for the filesystem backend; `None` disables it
    #[serde(default)]
    pub filesystem_root: Option<PathBuf>,

    /// Remote store URL; `None` disables the remote backend
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Invalidation broadcast; `None` keeps invalidations local
    #[serde(default)]
    pub broadcast: Option<BroadcastConfig>,
}

fn default_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_backend() -> BackendKind {
    BackendKind::Memory
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            default_ttl: default_ttl(),
            default_backend: default_backend(),
            filesystem_root: None,
            redis_url: None,
            broadcast: None,
        }
    }
}

impl CacheConfig {
    /// Create a memory-only configuration for a namespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use memora_cache::CacheConfig;
    ///
    /// let config = CacheConfig::new("users");
    /// assert_eq!(config.namespace, "users");
    /// ```
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Load configuration from `MEMORA_*` environment variables.
    ///
    /// Setting `MEMORA_BROADCAST_PORT` or `MEMORA_BROADCAST_TARGET` enables
    /// broadcasting. A value that does not parse is a [`CacheError::Config`].
    pub fn from_env() -> CacheResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> CacheResult<Self> {
        let mut config = Self::default();

        if let Some(namespace) = var("MEMORA_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Some(ttl) = var("MEMORA_DEFAULT_TTL") {
            let secs: u64 = ttl
                .parse()
                .map_err(|_| CacheError::Config(format!("invalid MEMORA_DEFAULT_TTL: {}", ttl)))?;
            config.default_ttl = Duration::from_secs(secs);
        }

        if let Some(backend) = var("MEMORA_BACKEND") {
            config.default_backend = backend.parse()?;
        }

        if let Some(dir) = var("MEMORA_CACHE_DIR") {
            config.filesystem_root = Some(PathBuf::from(dir));
        }

        if let Some(url) = var("MEMORA_REDIS_URL").or_else(|| var("REDIS_URL")) {
            config.redis_url = Some(url);
        }

        let port = var("MEMORA_BROADCAST_PORT");
        let target = var("MEMORA_BROADCAST_TARGET");
        if port.is_some() || target.is_some() {
            let mut broadcast = BroadcastConfig::default();
            if let Some(port) = port {
                broadcast.port = port.parse().map_err(|_| {
                    CacheError::Config(format!("invalid MEMORA_BROADCAST_PORT: {}", port))
                })?;
            }
            if let Some(target) = target {
                broadcast.target = target.parse().map_err(|_| {
                    CacheError::Config(format!("invalid MEMORA_BROADCAST_TARGET: {}", target))
                })?;
            }
            config.broadcast = Some(broadcast);
        }

        Ok(config)
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the default backend.
    pub fn with_default_backend(mut self, backend: BackendKind) -> Self {
        self.default_backend = backend;
        self
    }

    /// Enable the filesystem backend under `root/<namespace>`.
    pub fn with_filesystem(mut self, root: impl Into<PathBuf>) -> Self {
        self.filesystem_root = Some(root.into());
        self
    }

    /// Enable the remote backend.
    pub fn with_redis(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Enable invalidation broadcast.
    pub fn with_broadcast(mut self, broadcast: BroadcastConfig) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    /// Options for a call using the configured defaults.
    pub fn default_options(&self) -> CacheOptions {
        CacheOptions::new(self.default_ttl)
    }
}

/// Per-call storage options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Time-to-live; zero means compute without storing
    pub ttl: Duration,
    /// Tags attached to the stored entry
    pub tags: Vec<String>,
    /// Backend override for this entry
    pub backend: Option<BackendKind>,
}

impl CacheOptions {
    /// Options with a TTL and no tags.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    /// Options with a TTL in whole seconds.
    pub fn seconds(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
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

    /// Add a single tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Store on a specific backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Whether a result computed with these options is stored at all.
    pub fn persists(&self) -> bool {
        !self.ttl.is_zero()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config() {
        let config = CacheConfig::new("orders");
        assert_eq!(config.namespace, "orders");
        assert_eq!(config.default_backend, BackendKind::Memory);
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert!(config.filesystem_root.is_none());
        assert!(config.broadcast.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new("orders")
            .with_default_ttl(Duration::from_secs(300))
            .with_default_backend(BackendKind::Filesystem)
            .with_filesystem("/tmp/memora")
            .with_redis("redis://localhost:6379")
            .with_broadcast(BroadcastConfig::on_port(9000));

        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.default_backend, BackendKind::Filesystem);
        assert_eq!(config.filesystem_root, Some(PathBuf::from("/tmp/memora")));
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.broadcast.unwrap().port, 9000);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("fs".parse::<BackendKind>().unwrap(), BackendKind::Filesystem);
        assert_eq!("Redis".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert_eq!("mem".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("disk".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{"namespace":"posts"}"#).unwrap();
        assert_eq!(config.namespace, "posts");
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.default_backend, BackendKind::Memory);

        let config: CacheConfig =
            serde_json::from_str(r#"{"namespace":"posts","default_ttl":5,"default_backend":"remote"}"#)
                .unwrap();
        assert_eq!(config.default_ttl, Duration::from_secs(5));
        assert_eq!(config.default_backend, BackendKind::Remote);
    }

    #[test]
    fn test_broadcast_defaults() {
        let broadcast = BroadcastConfig::default();
        assert_eq!(broadcast.port, DEFAULT_BROADCAST_PORT);
        assert_eq!(broadcast.target, IpAddr::V4(Ipv4Addr::BROADCAST));
        assert_eq!(broadcast.bind_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(broadcast.destination(), "255.255.255.255:47474".parse::<SocketAddr>().unwrap());

        let peer = BroadcastConfig::on_port(9000)
            .with_target(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_target_port(9001);
        assert_eq!(peer.listen_addr().port(), 9000);
        assert_eq!(peer.destination(), "127.0.0.1:9001".parse::<SocketAddr>().unwrap());
    }

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn test_from_lookup() {
        let config = CacheConfig::from_lookup(vars(&[
            ("MEMORA_NAMESPACE", "billing"),
            ("MEMORA_DEFAULT_TTL", "120"),
            ("MEMORA_BACKEND", "fs"),
            ("MEMORA_CACHE_DIR", "/var/cache/memora"),
            ("REDIS_URL", "redis://cache:6379"),
            ("MEMORA_BROADCAST_PORT", "9100"),
            ("MEMORA_BROADCAST_TARGET", "10.0.0.255"),
        ]))
        .unwrap();

        assert_eq!(config.namespace, "billing");
        assert_eq!(config.default_ttl, Duration::from_secs(120));
        assert_eq!(config.default_backend, BackendKind::Filesystem);
        assert_eq!(config.filesystem_root, Some(PathBuf::from("/var/cache/memora")));
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        let broadcast = config.broadcast.unwrap();
        assert_eq!(broadcast.destination(), "10.0.0.255:9100".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_from_lookup_without_broadcast() {
        let config = CacheConfig::from_lookup(vars(&[])).unwrap();
        assert!(config.broadcast.is_none());
        assert!(config.redis_url.is_none());

        let config = CacheConfig::from_lookup(vars(&[("MEMORA_BROADCAST_TARGET", "127.0.0.1")])).unwrap();
        assert_eq!(config.broadcast.unwrap().port, DEFAULT_BROADCAST_PORT);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        for (name, value) in [
            ("MEMORA_DEFAULT_TTL", "soon"),
            ("MEMORA_BACKEND", "disk"),
            ("MEMORA_BROADCAST_PORT", "70000"),
            ("MEMORA_BROADCAST_TARGET", "everyone"),
        ] {
            let result = CacheConfig::from_lookup(vars(&[(name, value)]));
            match result {
                Err(CacheError::Config(message)) => assert!(message.contains(value), "{}", message),
                other => panic!("{} = {} gave {:?}", name, value, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_options() {
        let options = CacheOptions::seconds(30)
            .with_tags(["users", "teams"])
            .with_tag("roles")
            .with_backend(BackendKind::Filesystem);

        assert!(options.persists());
        assert_eq!(options.tags, vec!["users", "teams", "roles"]);
        assert_eq!(options.backend, Some(BackendKind::Filesystem));
        assert!(!CacheOptions::seconds(0).persists());
    }
}
