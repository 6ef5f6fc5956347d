//! In-process backend with Redis semantics.
//!
//! Used by tests and by single-node deployments that do not run Redis.
//! Supports the subset of behaviour the cache relies on: TTL expiry, glob
//! `SCAN MATCH`, sets, and cursor paging. Expired entries are swept every
//! [`PURGE_INTERVAL`] writes; scan cursors idle for [`CURSOR_IDLE`] are
//! forgotten.

use crate::backend::{CacheBackend, KeyTtl};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Writes between sweeps of expired entries.
pub const PURGE_INTERVAL: u64 = 1024;

/// How long an unfinished scan keeps its cursor.
pub const CURSOR_IDLE: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// In-memory [`CacheBackend`].
///
/// Keys are kept ordered; a scan cursor resumes after the last key it
/// examined, so deleting keys between pages never skips the rest.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Entry>>>,
    cursors: Arc<Mutex<HashMap<u64, (String, Instant)>>>,
    next_cursor: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, including tag sets.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data.read().await.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.data.write().await.retain(|_, entry| entry.is_live(now));
    }

    async fn note_write(&self) {
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_INTERVAL == 0 {
            self.purge_expired().await;
        }
    }

    fn register_cursor(&self, last: String, now: Instant) -> u64 {
        let id = self.next_cursor.fetch_add(1, Ordering::Relaxed) + 1;
        let mut cursors = self.cursors.lock();
        cursors.retain(|_, (_, issued)| now.duration_since(*issued) < CURSOR_IDLE);
        cursors.insert(id, (last, now));
        id
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        match self.data.read().await.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::Set(_) => Err(StoreError::Other(format!(
                    "WRONGTYPE key {} holds a set",
                    key
                ))),
            },
            _ => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let now = Instant::now();
        let data = self.data.read().await;
        // MGET reports non-string values as nil rather than failing.
        Ok(keys
            .iter()
            .map(|key| match data.get(key) {
                Some(Entry {
                    value: Value::Str(s),
                    expires_at,
                }) if expires_at.is_none_or(|exp| exp > now) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let entry = Entry {
            value: Value::Str(value),
            expires_at: Some(Instant::now() + ttl),
        };
        self.data.write().await.insert(key.to_string(), entry);
        self.note_write().await;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = data.remove(key)
                && entry.is_live(now)
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .data
            .read()
            .await
            .get(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let now = Instant::now();
        Ok(match self.data.read().await.get(key) {
            Some(entry) if entry.is_live(now) => match entry.expires_at {
                Some(exp) => KeyTtl::Expires(exp - now),
                None => KeyTtl::Persistent,
            },
            _ => KeyTtl::Missing,
        })
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let now = Instant::now();
        let count = count.max(1);
        let resume = if cursor == 0 {
            None
        } else {
            match self.cursors.lock().remove(&cursor) {
                Some((last, _)) => Some(last),
                None => return Err(StoreError::Other(format!("ERR invalid cursor {}", cursor))),
            }
        };

        let data = self.data.read().await;
        let lower = match &resume {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };

        // Like Redis, COUNT bounds the keys examined, not the keys returned.
        let examined: Vec<(&String, &Entry)> = data
            .range::<String, _>((lower, Bound::Unbounded))
            .take(count)
            .collect();
        let matched = examined
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| (*key).clone())
            .collect();

        let next_cursor = match examined.last() {
            Some((last, _)) if examined.len() == count => {
                self.register_cursor((*last).clone(), now)
            }
            _ => 0,
        };
        Ok((next_cursor, matched))
    }

    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<()> {
        let now = Instant::now();
        {
            let mut data = self.data.write().await;
            let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });
            if !entry.is_live(now) {
                *entry = Entry {
                    value: Value::Set(BTreeSet::new()),
                    expires_at: None,
                };
            }
            match &mut entry.value {
                Value::Set(set) => set.extend(members.iter().cloned()),
                Value::Str(_) => {
                    return Err(StoreError::Other(format!(
                        "WRONGTYPE key {} holds a string",
                        key
                    )));
                }
            }
        }
        self.note_write().await;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        match self.data.read().await.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                Value::Str(_) => Err(StoreError::Other(format!(
                    "WRONGTYPE key {} holds a string",
                    key
                ))),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let mut data = self.data.write().await;
        let Some(Entry {
            value: Value::Set(set),
            ..
        }) = data.get_mut(key)
        else {
            return Ok(0);
        };
        let removed = members.iter().filter(|m| set.remove(*m)).count() as u64;
        if set.is_empty() {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn flush(&self) -> StoreResult<()> {
        self.data.write().await.clear();
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Redis-style glob match: `*`, `?`, `[abc]`, `[a-z]`, `[^a]`, and `\`
/// escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_from(&p, &t)
}

fn match_from(p: &[char], t: &[char]) -> bool {
    let (mut pi, mut ti) = (0, 0);
    // Backtrack point for the most recent `*`.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '[' => match match_class(p, pi, t[ti]) {
                    Some((true, next)) => {
                        pi = next;
                        ti += 1;
                        continue;
                    }
                    Some((false, _)) => {}
                    // Unterminated class: the bracket is a literal.
                    None if t[ti] == '[' => {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                    None => {}
                },
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// Match `c` against the class starting at `p[start] == '['`.
/// Returns `(matched, index after ']')`, or `None` for an unterminated class.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == '^';
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < p.len() && (first || p[i] != ']') {
        first = false;
        if p[i] == '\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let (lo, hi) = if p[i] <= p[i + 2] {
                (p[i], p[i + 2])
            } else {
                (p[i + 2], p[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= p[i] == c;
            i += 1;
        }
    }
    if i >= p.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

/// Escape glob metacharacters so `value` matches only itself.
pub fn glob_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("saas:user:*", "saas:user:42"));
        assert!(glob_match("saas:user:*", "saas:user:"));
        assert!(!glob_match("saas:user:*", "saas:users:42"));
        assert!(glob_match("saas:*:list:*", "saas:users:list:t1:abc"));
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_glob_escape_round_trip() {
        let id = "odd*id?[x]";
        let pattern = format!("saas:user:{}", glob_escape(id));
        assert!(glob_match(&pattern, "saas:user:odd*id?[x]"));
        assert!(!glob_match(&pattern, "saas:user:oddXid?[x]"));
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".into()));
        assert_eq!(
            backend
                .delete_many(&["k".to_string(), "absent".to_string()])
                .await
                .unwrap(),
            1
        );
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(matches!(backend.ttl("k").await.unwrap(), KeyTtl::Expires(_)));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.ttl("k").await.unwrap(), KeyTtl::Missing);
        assert!(!backend.expire("k", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_pages_cover_all_matches() {
        let backend = InMemoryBackend::new();
        for i in 0..25 {
            backend
                .set(&format!("saas:user:{}", i), "x".into(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        backend
            .set("saas:tenant:1", "x".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let mut cursor = 0;
        let mut found = Vec::new();
        let mut pages = 0;
        loop {
            let (next, keys) = backend.scan(cursor, "saas:user:*", 10).await.unwrap();
            found.extend(keys);
            pages += 1;
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(found.len(), 25);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn test_deleting_between_pages_skips_nothing() {
        let backend = InMemoryBackend::new();
        for i in 0..30 {
            backend
                .set(&format!("k{:02}", i), "x".into(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let (next, keys) = backend.scan(cursor, "k*", 7).await.unwrap();
            deleted += backend.delete_many(&keys).await.unwrap();
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(deleted, 30);
        assert!(backend.is_empty().await);
        assert!(backend.scan(99, "*", 10).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_swept_by_writes() {
        let backend = InMemoryBackend::new();
        backend
            .set("old", "x".into(), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        for i in 1..PURGE_INTERVAL {
            backend
                .set(&format!("k{}", i), "x".into(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        assert!(!backend.data.read().await.contains_key("old"));
        assert_eq!(backend.len().await, (PURGE_INTERVAL - 1) as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_cursors_are_forgotten() {
        let backend = InMemoryBackend::new();
        for i in 0..5 {
            backend
                .set(&format!("k{}", i), "x".into(), Duration::from_secs(3600))
                .await
                .unwrap();
        }

        let (abandoned, _) = backend.scan(0, "k*", 2).await.unwrap();
        assert_ne!(abandoned, 0);

        tokio::time::advance(CURSOR_IDLE + Duration::from_secs(1)).await;
        let (fresh, _) = backend.scan(0, "k*", 2).await.unwrap();

        assert_eq!(backend.cursors.lock().len(), 1);
        assert!(backend.scan(abandoned, "k*", 2).await.is_err());
        assert!(backend.scan(fresh, "k*", 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_sets() {
        let backend = InMemoryBackend::new();
        backend
            .set_add("tag:users", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        backend.set_add("tag:users", &["a".to_string()]).await.unwrap();

        let mut members = backend.set_members("tag:users").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        assert_eq!(
            backend
                .set_remove("tag:users", &["a".to_string(), "b".to_string()])
                .await
                .unwrap(),
            2
        );
        assert!(!backend.exists("tag:users").await.unwrap());
        assert!(backend.get("tag:users").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(backend.set_add("k", &["m".to_string()]).await.is_err());
        assert_eq!(backend.get_many(&["k".to_string()]).await.unwrap(), vec![Some("v".to_string())]);
    }
}
