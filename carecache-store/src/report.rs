//! Cache-aside wrapper for expensive report computations.

use crate::keys::KeyGenerator;
use crate::store::{CacheStore, SetOptions};
use carecache_log::{debug, warn};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Report service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportServiceConfig {
    /// TTL for report entries when the caller gives none.
    #[serde(with = "crate::config::secs")]
    pub default_ttl: Duration,
    /// Collapse concurrent misses on the same key into one computation.
    pub single_flight: bool,
}

impl Default for ReportServiceConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(600),
            single_flight: false,
        }
    }
}

/// Tag every report of `report_type` is indexed under.
pub fn report_tag(report_type: &str) -> String {
    format!("report:{}", report_type)
}

/// Tag every report of `tenant_id` is indexed under.
pub fn tenant_reports_tag(tenant_id: &str) -> String {
    format!("tenant:{}:reports", tenant_id)
}

/// Serves report data from the cache, computing and storing it on a miss.
///
/// Without single-flight, concurrent misses on one key each run the
/// computation and the last write wins.
pub struct CachedReportService {
    store: Arc<CacheStore>,
    config: ReportServiceConfig,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl CachedReportService {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self::with_config(store, ReportServiceConfig::default())
    }

    pub fn with_config(store: Arc<CacheStore>, config: ReportServiceConfig) -> Self {
        Self {
            store,
            config,
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ReportServiceConfig {
        &self.config
    }

    fn keys(&self) -> &KeyGenerator {
        self.store.keys()
    }

    /// Return the cached report for `(report_type, tenant_id, filters)`, or
    /// run `compute`, cache its result and return it.
    ///
    /// A failed computation is returned as is and nothing is cached.
    pub async fn get_cached_report_data<T, E, F, Fut>(
        &self,
        report_type: &str,
        tenant_id: &str,
        filters: &Value,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.keys().report(report_type, tenant_id, filters);

        if let Some(cached) = self.store.get::<T>(&key).await {
            debug!("report cache hit: {}", key);
            return Ok(cached);
        }

        if !self.config.single_flight {
            return self
                .compute_and_store(&key, report_type, tenant_id, compute, ttl)
                .await;
        }

        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            // The previous holder may have filled the entry.
            match self.store.try_get::<T>(&key).await {
                Ok(Some(cached)) => Ok(cached),
                _ => {
                    self.compute_and_store(&key, report_type, tenant_id, compute, ttl)
                        .await
                }
            }
        };

        // Only the map and this task hold the lock: nobody is waiting.
        self.in_flight
            .remove_if(&key, |_, held| Arc::strong_count(held) == 2);

        result
    }

    async fn compute_and_store<T, E, F, Fut>(
        &self,
        key: &str,
        report_type: &str,
        tenant_id: &str,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        debug!("report cache miss, computing: {}", key);
        let value = compute().await?;

        let options = SetOptions::new()
            .ttl(ttl.unwrap_or(self.config.default_ttl))
            .tag(report_tag(report_type))
            .tag(tenant_reports_tag(tenant_id));

        if !self.store.set(key, &value, options).await {
            warn!("computed report {} could not be cached", key);
        }
        Ok(value)
    }

    /// Drop every cached report of `report_type`, across tenants.
    pub async fn invalidate_report_type(&self, report_type: &str) -> u64 {
        self.store
            .invalidate_by_tags(&[report_tag(report_type)])
            .await
    }

    /// Drop every cached report of `tenant_id`.
    pub async fn invalidate_tenant_reports(&self, tenant_id: &str) -> u64 {
        self.store
            .invalidate_by_tags(&[tenant_reports_tag(tenant_id)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Revenue {
        total: u64,
    }

    fn service(single_flight: bool) -> Arc<CachedReportService> {
        Arc::new(CachedReportService::with_config(
            Arc::new(CacheStore::in_memory()),
            ReportServiceConfig {
                single_flight,
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let service = service(false);
        let calls = AtomicUsize::new(0);
        let filters = json!({"month": "2024-01"});

        for _ in 0..2 {
            let report: Result<Revenue, String> = service
                .get_cached_report_data(
                    "revenue",
                    "t1",
                    &filters,
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Revenue { total: 10 })
                    },
                    None,
                )
                .await;
            assert_eq!(report.unwrap(), Revenue { total: 10 });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_error_is_not_cached() {
        let service = service(false);
        let failed: Result<Revenue, String> = service
            .get_cached_report_data(
                "revenue",
                "t1",
                &json!({}),
                || async { Err("warehouse offline".to_string()) },
                None,
            )
            .await;
        assert_eq!(failed.unwrap_err(), "warehouse offline");

        let ok: Result<Revenue, String> = service
            .get_cached_report_data(
                "revenue",
                "t1",
                &json!({}),
                || async { Ok(Revenue { total: 3 }) },
                None,
            )
            .await;
        assert_eq!(ok.unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_invalidation_by_type_and_tenant() {
        let service = service(false);
        for tenant in ["t1", "t2"] {
            let _: Result<Revenue, String> = service
                .get_cached_report_data(
                    "revenue",
                    tenant,
                    &json!({}),
                    || async { Ok(Revenue { total: 1 }) },
                    None,
                )
                .await;
        }
        let _: Result<Revenue, String> = service
            .get_cached_report_data(
                "usage",
                "t1",
                &json!({}),
                || async { Ok(Revenue { total: 2 }) },
                None,
            )
            .await;

        assert_eq!(service.invalidate_tenant_reports("t1").await, 2);
        assert_eq!(service.invalidate_report_type("revenue").await, 1);
        assert_eq!(service.invalidate_report_type("usage").await, 0);
    }

    async fn concurrent_misses(single_flight: bool) -> usize {
        const CALLERS: usize = 8;
        let service = service(single_flight);
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let service = service.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    let result: Result<Revenue, String> = service
                        .get_cached_report_data(
                            "revenue",
                            "t1",
                            &json!({}),
                            || async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                // Hold every caller inside compute until all
                                // of them have missed.
                                if !single_flight {
                                    barrier.wait().await;
                                }
                                tokio::task::yield_now().await;
                                Ok(Revenue { total: 7 })
                            },
                            None,
                        )
                        .await;
                    result.unwrap()
                })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            assert_eq!(handle.unwrap(), Revenue { total: 7 });
        }
        calls.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_each_compute_without_single_flight() {
        assert_eq!(concurrent_misses(false).await, 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_collapses_concurrent_misses() {
        assert_eq!(concurrent_misses(true).await, 1);
    }
}
