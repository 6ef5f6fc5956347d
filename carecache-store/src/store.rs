//! The cache store: typed get/set over a backend, tag index, batched
//! pattern deletion and statistics.
//!
//! Every public method fails open. Reads that hit a backend or payload error
//! are misses; writes and deletes report `false`/`0`. The `try_*` variants
//! expose the underlying error for callers that need to count failures.

use crate::backend::{CacheBackend, KeyTtl};
use crate::compression::Envelope;
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::keys::{KeyGenerator, tag_key};
use crate::memory::InMemoryBackend;
use crate::stats::{CacheStats, StatsRecorder};
use carecache_log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options for [`CacheStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Entry TTL; the store's default when `None`.
    pub ttl: Option<Duration>,
    /// Force compression regardless of size.
    pub compress: bool,
    /// Tags to index the key under.
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Tag-indexed cache over a shared key-value store.
///
/// Create one per process and share it behind an `Arc`.
///
/// ```
/// use carecache_store::{CacheStore, SetOptions};
///
/// # async fn example() {
/// let store = CacheStore::in_memory();
/// store.set("saas:user:42", &"Amara", SetOptions::new().tag("users")).await;
/// assert_eq!(store.invalidate_by_tags(&["users"]).await, 1);
/// assert_eq!(store.get::<String>("saas:user:42").await, None);
/// # }
/// ```
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    config: StoreConfig,
    keys: KeyGenerator,
    stats: StatsRecorder,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, config: StoreConfig) -> Self {
        carecache_log::init();
        Self {
            backend,
            keys: KeyGenerator::new(config.key_prefix.clone()),
            stats: StatsRecorder::new(config.stats_window),
            config,
        }
    }

    /// Connect to Redis with the given configuration.
    #[cfg(feature = "redis")]
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let backend = crate::redis_backend::RedisBackend::connect(&config).await?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// A store over a fresh [`InMemoryBackend`] with default configuration.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), StoreConfig::default())
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    // ========== Reads ==========

    /// Typed read. Backend errors and corrupt payloads are misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let started = Instant::now();
        let value = match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("cache get {} failed open: {}", key, e);
                None
            }
        };
        self.stats.record_read(value.is_some(), started.elapsed());
        value
    }

    /// Typed read that reports errors and does not touch statistics.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.backend.get(key).await? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Read several keys in one round trip; results follow input order.
    pub async fn mget<T, K>(&self, keys: &[K]) -> Vec<Option<T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let started = Instant::now();
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();

        let raw = match self.backend.get_many(&keys).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cache mget of {} keys failed open: {}", keys.len(), e);
                vec![None; keys.len()]
            }
        };

        let values: Vec<Option<T>> = raw
            .into_iter()
            .zip(&keys)
            .map(|(raw, key)| {
                raw.and_then(|raw| match decode(&raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("cache entry {} unreadable, treating as miss: {}", key, e);
                        None
                    }
                })
            })
            .collect();

        let hits = values.iter().filter(|v| v.is_some()).count() as u64;
        self.stats
            .record_batch_read(hits, values.len() as u64 - hits, started.elapsed());
        values
    }

    pub async fn exists(&self, key: &str) -> bool {
        let started = Instant::now();
        let exists = self.backend.exists(key).await.unwrap_or_else(|e| {
            warn!("cache exists {} failed open: {}", key, e);
            false
        });
        self.stats.record_operation(started.elapsed());
        exists
    }

    /// Seconds until `key` expires, or `-1` when it is absent, persistent,
    /// or the backend is unreachable.
    pub async fn ttl(&self, key: &str) -> i64 {
        let started = Instant::now();
        let ttl = match self.backend.ttl(key).await {
            Ok(ttl) => ttl.as_secs_or_minus_one(),
            Err(e) => {
                warn!("cache ttl {} failed open: {}", key, e);
                -1
            }
        };
        self.stats.record_operation(started.elapsed());
        ttl
    }

    // ========== Writes ==========

    /// Write `value` under `key`, then index it under each tag.
    ///
    /// The entry and each tag membership are independent writes; a failure
    /// part way leaves the entry without full tag membership, which later
    /// tag invalidation tolerates.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: SetOptions) -> bool {
        let started = Instant::now();
        let ok = match self.try_set(key, value, &options).await {
            Ok(()) => true,
            Err(e) => {
                warn!("cache set {} failed: {}", key, e);
                false
            }
        };
        self.stats.record_operation(started.elapsed());
        ok
    }

    pub async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        let compress = options.compress || json.len() > self.config.compression_threshold;
        let raw = Envelope::seal(json, compress)?.to_json()?;
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);

        self.backend.set(key, raw, ttl).await?;

        let member = [key.to_string()];
        for tag in &options.tags {
            let index = tag_key(tag);
            self.backend.set_add(&index, &member).await?;
            self.extend_tag_ttl(&index, ttl.max(self.config.tag_ttl)).await?;
        }
        Ok(())
    }

    /// Tag sets only ever have their TTL extended, so a set never expires
    /// before a member written with a longer TTL. A set without an expiry
    /// was just created by `set_add`.
    async fn extend_tag_ttl(&self, index: &str, wanted: Duration) -> StoreResult<()> {
        match self.backend.ttl(index).await? {
            KeyTtl::Expires(current) if current >= wanted => Ok(()),
            _ => self.backend.expire(index, wanted).await.map(|_| ()),
        }
    }

    /// Reset the TTL of an existing key; `false` if absent or on failure.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let started = Instant::now();
        let ok = self.backend.expire(key, ttl).await.unwrap_or_else(|e| {
            warn!("cache expire {} failed: {}", key, e);
            false
        });
        self.stats.record_operation(started.elapsed());
        ok
    }

    // ========== Deletes ==========

    /// Delete one key; `true` when it existed.
    pub async fn del(&self, key: &str) -> bool {
        let started = Instant::now();
        let deleted = match self.backend.delete_many(&[key.to_string()]).await {
            Ok(n) => n > 0,
            Err(e) => {
                warn!("cache del {} failed: {}", key, e);
                false
            }
        };
        self.stats.record_operation(started.elapsed());
        deleted
    }

    /// Delete every key matching a glob; returns how many were deleted.
    ///
    /// A failed page still counts the keys removed before it.
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        let started = Instant::now();
        let deleted = self.try_del_pattern(pattern).await.unwrap_or_else(|e| {
            warn!("cache delPattern {} failed: {}", pattern, e);
            e.deleted_before_failure()
        });
        self.stats.record_operation(started.elapsed());
        deleted
    }

    /// Cursor scan in pages of `scan_batch_size`; each page is deleted in
    /// chunks of `delete_batch_size` before the next page is requested.
    ///
    /// On failure the error is [`StoreError::Partial`](crate::StoreError::Partial) when keys had
    /// already been removed.
    pub async fn try_del_pattern(&self, pattern: &str) -> StoreResult<u64> {
        let mut deleted = 0;
        self.scan_and_delete(pattern, &mut deleted)
            .await
            .map_err(|e| e.after_deleting(deleted))?;
        debug!("delPattern {} removed {} keys", pattern, deleted);
        Ok(deleted)
    }

    async fn scan_and_delete(&self, pattern: &str, deleted: &mut u64) -> StoreResult<()> {
        let mut cursor = 0;
        loop {
            let (next, keys) = self
                .backend
                .scan(cursor, pattern, self.config.scan_batch_size)
                .await?;
            self.delete_in_batches(&keys, deleted).await?;
            cursor = next;
            if cursor == 0 {
                return Ok(());
            }
        }
    }

    /// Count keys matching a glob, paging the scan like `del_pattern`.
    pub async fn count_pattern(&self, pattern: &str) -> u64 {
        self.try_count_pattern(pattern).await.unwrap_or_else(|e| {
            warn!("counting {} failed: {}", pattern, e);
            0
        })
    }

    pub async fn try_count_pattern(&self, pattern: &str) -> StoreResult<u64> {
        let mut cursor = 0;
        let mut count = 0;
        loop {
            let (next, keys) = self
                .backend
                .scan(cursor, pattern, self.config.scan_batch_size)
                .await?;
            count += keys.len() as u64;
            cursor = next;
            if cursor == 0 {
                return Ok(count);
            }
        }
    }

    /// Delete every key indexed under any of `tags`, then drop those keys
    /// from the tag sets.
    ///
    /// Keys also indexed under other tags stay listed there until those
    /// sets expire, are pruned, or are invalidated; deleting an absent key
    /// is a no-op. A failing tag does not stop the others.
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> u64 {
        let started = Instant::now();
        let deleted = self.try_invalidate_by_tags(tags).await.unwrap_or_else(|e| {
            warn!("cache invalidateByTags failed: {}", e);
            e.deleted_before_failure()
        });
        self.stats.record_operation(started.elapsed());
        deleted
    }

    /// Every tag is attempted; the first failure is returned afterwards,
    /// carrying the count deleted across all tags.
    pub async fn try_invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> StoreResult<u64> {
        let mut deleted = 0;
        let mut first_error = None;
        for tag in tags {
            if let Err(e) = self.invalidate_tag(tag.as_ref(), &mut deleted).await {
                warn!("invalidating tag {} failed: {}", tag.as_ref(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.after_deleting(deleted)),
            None => Ok(deleted),
        }
    }

    /// Only the members read here leave the set, so a key tagged by a
    /// concurrent write stays indexed.
    async fn invalidate_tag(&self, tag: &str, deleted: &mut u64) -> StoreResult<()> {
        let index = tag_key(tag);
        let members = self.backend.set_members(&index).await?;
        let before = *deleted;
        self.delete_in_batches(&members, deleted).await?;
        self.backend.set_remove(&index, &members).await?;
        debug!(
            "tag {} invalidated: {} members, {} live",
            tag,
            members.len(),
            *deleted - before
        );
        Ok(())
    }

    async fn delete_in_batches(&self, keys: &[String], deleted: &mut u64) -> StoreResult<()> {
        for chunk in keys.chunks(self.config.delete_batch_size.max(1)) {
            *deleted += self.backend.delete_many(chunk).await?;
        }
        Ok(())
    }

    /// Drop **everything** in the backing database, for every tenant.
    /// Emergency use only.
    pub async fn clear(&self) -> bool {
        match self.try_clear().await {
            Ok(()) => true,
            Err(e) => {
                warn!("cache clear failed: {}", e);
                false
            }
        }
    }

    pub async fn try_clear(&self) -> StoreResult<()> {
        warn!("flushing the entire cache database");
        self.backend.flush().await
    }

    // ========== Tag index maintenance ==========

    /// Keys currently listed under `tag`, live or not.
    pub async fn tag_members(&self, tag: &str) -> Vec<String> {
        self.backend
            .set_members(&tag_key(tag))
            .await
            .unwrap_or_else(|e| {
                warn!("reading tag {} failed: {}", tag, e);
                Vec::new()
            })
    }

    /// Remove members of `tag` whose key no longer exists; returns how many
    /// were removed.
    pub async fn prune_tag(&self, tag: &str) -> u64 {
        self.try_prune_tag(tag).await.unwrap_or_else(|e| {
            warn!("pruning tag {} failed: {}", tag, e);
            0
        })
    }

    pub async fn try_prune_tag(&self, tag: &str) -> StoreResult<u64> {
        let index = tag_key(tag);
        let members = self.backend.set_members(&index).await?;
        if members.is_empty() {
            return Ok(0);
        }
        let present = self.backend.get_many(&members).await?;
        let dangling: Vec<String> = members
            .into_iter()
            .zip(present)
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key)
            .collect();
        self.backend.set_remove(&index, &dangling).await
    }

    // ========== Operations ==========

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Round-trip liveness probe.
    pub async fn health_check(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("cache health check failed: {}", e);
                false
            }
        }
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> StoreResult<T> {
    let json = Envelope::from_json(raw)?.open()?;
    Ok(serde_json::from_str(&json)?)
}
