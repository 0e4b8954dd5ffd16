//! Error types for cache operations.

use crate::config::BackendKind;
use std::sync::Arc;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Failure of a user computation, shared by every caller coalesced onto it.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another live cache instance already owns this namespace
    #[error("Cache namespace must be unique: {0}")]
    NamespaceInUse(String),

    /// The declared relations contain a cycle of cascading deletes
    #[error("Cascade relations form a cycle: {}", .0.join(" -> "))]
    CyclicCascade(Vec<String>),

    /// The requested backend is not configured on this instance
    #[error("Backend not configured: {0}")]
    BackendUnavailable(BackendKind),

    /// The computation failed; every coalesced caller sees the same error
    #[error("Computation failed: {0}")]
    Computation(SharedError),

    /// The computation task ended without producing an outcome
    #[error("Computation aborted before completion")]
    Aborted,

    /// Broadcast socket error
    #[error("Broadcast error: {0}")]
    Broadcast(String),
}

impl CacheError {
    /// The shared computation failure, if this is one.
    pub fn computation(&self) -> Option<&SharedError> {
        match self {
            Self::Computation(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this error aborts cache construction.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NamespaceInUse(_) | Self::CyclicCascade(_) | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = CacheError::CyclicCascade(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Cascade relations form a cycle: a -> b -> a");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_computation_accessor() {
        let source: SharedError = Arc::new(std::io::Error::other("db down"));
        let err = CacheError::Computation(source.clone());
        assert!(Arc::ptr_eq(err.computation().unwrap(), &source));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("db down"));
    }
}
