// Memora - result caching for expensive asynchronous computations
//
// This library deduplicates concurrent computations per key, expires results
// after a TTL, and invalidates them by key, by tag or through a cascade graph
// of resources, with memory, filesystem or Redis persistence.

// Re-export the engine
pub use memora_cache::*;

// Re-export the logging facade
pub use memora_log as log;

// Prelude for common imports
pub mod prelude {
    pub use memora_cache::prelude::*;
    pub use memora_cache::{CacheStats, Computed};

    pub use memora_log::{LogConfig, debug, error, info, trace, warn};
}
