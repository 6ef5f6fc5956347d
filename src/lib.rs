// carecache - tag-indexed caching and rule-driven invalidation
//
// This library wires the cache store, the invalidation dispatcher and the
// report cache into one runtime per process.

pub mod runtime;

pub use runtime::{CacheRuntime, RuntimeBuilder, RuntimeOptions};

// Re-export member crates
pub use carecache_invalidation as invalidation;
pub use carecache_log as log;
pub use carecache_store as store;

pub use carecache_invalidation::{
    CacheWarmer, DispatchOutcome, DispatchReport, DispatcherConfig, EventType, FullPolicy,
    InvalidationDispatcher, InvalidationError, InvalidationEvent, InvalidationQueue,
    InvalidationResult, InvalidationRule, InvalidationStats, PlaceholderPolicy, QueueConfig,
    QueueStats, RuleRegistry, StoreOnlyWarmer,
};
pub use carecache_store::{
    CacheBackend, CacheStats, CacheStore, CachedReportService, InMemoryBackend, KeyGenerator,
    ReportServiceConfig, SetOptions, StoreConfig, StoreError, StoreResult,
};

#[cfg(feature = "redis")]
pub use carecache_store::RedisBackend;

// Prelude for common imports
pub mod prelude {
    pub use crate::runtime::{CacheRuntime, RuntimeOptions};
    pub use carecache_invalidation::prelude::*;
    pub use carecache_store::prelude::*;
}
