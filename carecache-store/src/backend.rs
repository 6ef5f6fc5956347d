//! Backing key-value store trait.

use crate::error::StoreResult;
use async_trait::async_trait;
use std::time::Duration;

/// Remaining lifetime of a key, as reported by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after this duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Seconds remaining, or `-1` for both missing and persistent keys.
    pub fn as_secs_or_minus_one(&self) -> i64 {
        match self {
            KeyTtl::Expires(d) => d.as_secs() as i64,
            KeyTtl::Missing | KeyTtl::Persistent => -1,
        }
    }
}

/// Primitive operations the cache needs from its backing store.
///
/// Every method is one round trip. Batching and fail-open policy live in
/// [`CacheStore`](crate::CacheStore), not here.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a raw string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Get several raw values in one round trip, in input order.
    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// Write a raw value with a TTL, overwriting any previous value.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    /// Delete keys; returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Set a TTL on an existing key; `false` when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// One page of a cursor scan over keys matching a glob.
    ///
    /// Start with cursor `0`; the scan is complete when the returned cursor
    /// is `0` again. `count` is a hint, not a limit.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> StoreResult<(u64, Vec<String>)>;

    /// Add members to a set.
    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<()>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Remove members from a set; returns how many were present.
    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// Drop every key in the database.
    ///
    /// **Warning:** affects all tenants sharing the database.
    async fn flush(&self) -> StoreResult<()>;

    /// Liveness round trip.
    async fn ping(&self) -> StoreResult<()>;
}
