//! Integration tests for common carecache workflows.
//!
//! These tests drive the whole runtime over the in-memory backend: writes
//! through the store, invalidation through the dispatcher and the queue,
//! and the report cache.

use async_trait::async_trait;
use carecache::invalidation::tags;
use carecache::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct TagLog {
    tags: Mutex<Vec<Vec<String>>>,
    critical: AtomicUsize,
}

#[async_trait]
impl CacheWarmer for TagLog {
    async fn invalidate_by_tags_and_warm(&self, tags: &[String]) -> InvalidationResult<()> {
        self.tags.lock().unwrap().push(tags.to_vec());
        Ok(())
    }

    async fn warm_critical_caches(&self) -> InvalidationResult<()> {
        self.critical.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn runtime_with_warmer(warmer: Arc<TagLog>) -> CacheRuntime {
    CacheRuntime::builder(StoreConfig::default())
        .warmer(warmer)
        .start(Arc::new(InMemoryBackend::new()))
        .unwrap()
}

// =============================================================================
// Store + Dispatcher
// =============================================================================

#[tokio::test]
async fn test_user_update_clears_profile_and_lists() {
    let runtime = CacheRuntime::in_memory();
    let keys = runtime.keys().clone();
    let store = runtime.store();

    let profile = keys.user("42");
    let permissions = keys.user_permissions("42");
    let list = keys.user_list("t1", &json!({"page": 1}));
    let other = keys.user("420");

    for key in [&profile, &permissions, &list, &other] {
        assert!(store.set(key, &json!({"k": key}), SetOptions::new()).await);
    }

    let outcome = runtime.dispatcher().invalidate_user_caches("42").await;
    assert!(outcome.is_success());

    assert!(!store.exists(&profile).await);
    assert!(!store.exists(&permissions).await);
    assert!(!store.exists(&list).await);
    assert!(store.exists(&other).await);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_tenant_update_warms_through_builder_warmer() {
    let warmer = Arc::new(TagLog::default());
    let runtime = runtime_with_warmer(warmer.clone());
    let key = runtime.keys().tenant("t1");

    runtime
        .store()
        .set(&key, &"Acme", SetOptions::new().tag(tags::TENANTS))
        .await;

    let outcome = runtime.dispatcher().invalidate_tenant_caches("t1").await;

    assert!(outcome.report().unwrap().warmed);
    assert!(!runtime.store().exists(&key).await);
    assert_eq!(
        *warmer.tags.lock().unwrap(),
        vec![vec![tags::TENANTS.to_string()]]
    );

    assert!(runtime.dispatcher().clear_all_caches().await);
    assert_eq!(warmer.critical.load(Ordering::SeqCst), 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unknown_event_leaves_store_untouched() {
    let runtime = CacheRuntime::in_memory();
    runtime.store().set("saas:user:1", &1, SetOptions::new()).await;

    let outcome = runtime
        .dispatcher()
        .handle_event(&InvalidationEvent::new("invoice.paid").with_entity_id("1"))
        .await;

    assert_eq!(outcome, DispatchOutcome::NoRule);
    assert!(runtime.store().exists("saas:user:1").await);
    assert_eq!(runtime.dispatcher().invalidation_stats().total_invalidations, 0);

    runtime.shutdown().await;
}

// =============================================================================
// Queue
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_published_events_dispatch_before_shutdown_returns() {
    let runtime = CacheRuntime::in_memory();
    let keys = runtime.keys().clone();

    for i in 0..10 {
        runtime
            .store()
            .set(&keys.conversation(&format!("c{}", i)), &i, SetOptions::new())
            .await;
    }

    for i in 0..10 {
        runtime
            .publish(
                InvalidationEvent::new(EventType::ConversationUpdated)
                    .with_entity_id(format!("c{}", i))
                    .with_metadata("tenantId", "t1"),
            )
            .await
            .unwrap();
    }
    runtime.shutdown().await;

    assert_eq!(runtime.queue_stats().processed, 10);
    assert_eq!(runtime.store().count_pattern("saas:conversation:*").await, 0);
    assert_eq!(
        runtime.dispatcher().invalidation_stats().successful_invalidations,
        10
    );
}

#[tokio::test]
async fn test_queue_options_apply() {
    let options = RuntimeOptions {
        queue: QueueConfig {
            capacity: 1,
            workers: 1,
            full_policy: FullPolicy::DropOldest,
        },
        ..RuntimeOptions::default()
    };
    let runtime = CacheRuntime::builder(StoreConfig::default())
        .options(options)
        .start(Arc::new(InMemoryBackend::new()))
        .unwrap();

    // Workers cannot run before this task yields.
    runtime.try_publish(InvalidationEvent::new(EventType::UserCreated)).unwrap();
    runtime.try_publish(InvalidationEvent::new(EventType::UserCreated)).unwrap();
    assert_eq!(runtime.queue_stats().dropped, 1);

    runtime.shutdown().await;
    assert_eq!(runtime.queue_stats().processed, 1);
}

// =============================================================================
// Reports
// =============================================================================

#[tokio::test]
async fn test_report_cache_and_trigger() {
    let runtime = CacheRuntime::in_memory();
    let computed = AtomicUsize::new(0);
    let filters = json!({"from": "2026-01-01", "to": "2026-03-31"});

    let compute = || async {
        computed.fetch_add(1, Ordering::SeqCst);
        Ok::<_, std::convert::Infallible>(json!({"visits": 120}))
    };

    for _ in 0..3 {
        let data: serde_json::Value = runtime
            .reports()
            .get_cached_report_data("usage", "t1", &filters, compute, None)
            .await
            .unwrap();
        assert_eq!(data["visits"], 120);
    }
    assert_eq!(computed.load(Ordering::SeqCst), 1);

    runtime
        .dispatcher()
        .invalidate_report_caches("usage", "t1")
        .await;

    let _: serde_json::Value = runtime
        .reports()
        .get_cached_report_data("usage", "t1", &filters, compute, None)
        .await
        .unwrap();
    assert_eq!(computed.load(Ordering::SeqCst), 2);

    assert_eq!(runtime.reports().invalidate_tenant_reports("t1").await, 1);

    runtime.shutdown().await;
}
