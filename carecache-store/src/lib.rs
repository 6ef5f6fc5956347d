//! Tag-indexed cache store for multi-tenant services.
//!
//! Wraps a shared key-value store (Redis by default) with:
//!
//! - **Deterministic keys** - `prefix:resource:id[:filterHash]`
//! - **Tag index** - invalidate every key written under a tag
//! - **Batched pattern deletion** - cursor scans, never `KEYS`
//! - **Transparent compression** - gzip for large payloads
//! - **Fail-open reads** - an unreachable store is a cache miss
//! - **Statistics** - hits, misses, rolling response time
//! - **Cache-aside reports** - [`CachedReportService`]
//!
//! # Features
//!
//! - `redis` - Redis backend via `ConnectionManager` (enabled by default)
//!
//! # Examples
//!
//! ## Redis
//!
//! ```no_run
//! use carecache_store::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StoreError> {
//!     let config = StoreConfig::from_env().key_prefix("saas").try_build()?;
//!     let store = CacheStore::connect(config).await?;
//!
//!     let key = store.keys().user("42");
//!     store
//!         .set(&key, &"Amara", SetOptions::new().ttl(Duration::from_secs(60)).tag("users"))
//!         .await;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Tag-based Invalidation
//!
//! ```
//! use carecache_store::*;
//!
//! # async fn example() {
//! let store = CacheStore::in_memory();
//!
//! store.set("saas:user:1", &"a", SetOptions::new().tags(["users", "tenant:t1"])).await;
//! store.set("saas:user:2", &"b", SetOptions::new().tag("users")).await;
//!
//! assert_eq!(store.invalidate_by_tags(&["users"]).await, 2);
//! # }
//! ```

pub mod backend;
pub mod compression;
pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
pub mod report;
pub mod stats;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis_backend;

pub use backend::{CacheBackend, KeyTtl};
pub use compression::Envelope;
pub use config::{StoreConfig, StoreConfigBuilder};
pub use error::{StoreError, StoreResult};
pub use keys::{KeyGenerator, TAG_NAMESPACE, filter_hash, tag_key};
pub use memory::{InMemoryBackend, glob_escape, glob_match};
pub use report::{CachedReportService, ReportServiceConfig};
pub use stats::CacheStats;
pub use store::{CacheStore, SetOptions};

#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{CacheBackend, KeyTtl};
    pub use crate::config::StoreConfig;
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::keys::KeyGenerator;
    pub use crate::memory::InMemoryBackend;
    pub use crate::report::{CachedReportService, ReportServiceConfig};
    pub use crate::stats::CacheStats;
    pub use crate::store::{CacheStore, SetOptions};

    #[cfg(feature = "redis")]
    pub use crate::redis_backend::RedisBackend;
}
