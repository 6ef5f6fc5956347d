//! Process-wide wiring: one store, one rule registry, one dispatcher, one
//! queue and one report service, built together and shut down together.

use carecache_invalidation::{
    CacheWarmer, DispatcherConfig, InvalidationDispatcher, InvalidationEvent, InvalidationQueue,
    InvalidationResult, QueueConfig, QueueStats, RuleRegistry,
};
use carecache_log::info;
use carecache_store::{
    CacheBackend, CacheStore, CachedReportService, InMemoryBackend, KeyGenerator,
    ReportServiceConfig, StoreConfig, StoreResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tuning for the components the runtime builds on top of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub dispatcher: DispatcherConfig,
    pub queue: QueueConfig,
    pub reports: ReportServiceConfig,

    /// Start with an empty registry instead of the default rule table
    pub skip_default_rules: bool,
}

/// Builder for [`CacheRuntime`].
pub struct RuntimeBuilder {
    config: StoreConfig,
    options: RuntimeOptions,
    warmer: Option<Arc<dyn CacheWarmer>>,
}

impl RuntimeBuilder {
    fn new(config: StoreConfig) -> Self {
        Self {
            config,
            options: RuntimeOptions::default(),
            warmer: None,
        }
    }

    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Warmer used for `warm_after_invalidation` rules and after a full clear.
    pub fn warmer(mut self, warmer: Arc<dyn CacheWarmer>) -> Self {
        self.warmer = Some(warmer);
        self
    }

    /// Connect to Redis and start the runtime.
    #[cfg(feature = "redis")]
    pub async fn connect(self) -> StoreResult<CacheRuntime> {
        let store = CacheStore::connect(self.config.clone()).await?;
        Ok(self.assemble(Arc::new(store)))
    }

    /// Start the runtime over an existing backend.
    ///
    /// Must be called inside a Tokio runtime; the queue spawns its workers.
    pub fn start(self, backend: Arc<dyn CacheBackend>) -> StoreResult<CacheRuntime> {
        self.config.validate()?;
        let store = CacheStore::new(backend, self.config.clone());
        Ok(self.assemble(Arc::new(store)))
    }

    fn assemble(self, store: Arc<CacheStore>) -> CacheRuntime {
        let rules = Arc::new(if self.options.skip_default_rules {
            RuleRegistry::new()
        } else {
            RuleRegistry::with_default_rules(store.keys())
        });

        let mut dispatcher = InvalidationDispatcher::new(store.clone(), rules.clone())
            .with_config(self.options.dispatcher);
        if let Some(warmer) = self.warmer {
            dispatcher = dispatcher.with_warmer(warmer);
        }
        let dispatcher = Arc::new(dispatcher);

        let queue = InvalidationQueue::start(dispatcher.clone(), self.options.queue);
        let reports = CachedReportService::with_config(store.clone(), self.options.reports);

        info!(
            "cache runtime ready: prefix '{}', {} invalidation rules",
            store.keys().prefix(),
            rules.len()
        );

        CacheRuntime {
            store,
            rules,
            dispatcher,
            queue,
            reports,
        }
    }
}

/// Every caching component of a process, sharing one store.
///
/// # Examples
///
/// ```
/// use carecache::prelude::*;
///
/// # async fn example() {
/// let runtime = CacheRuntime::in_memory();
/// let key = runtime.keys().tenant("t1");
///
/// runtime.store().set(&key, &"Acme", SetOptions::new()).await;
/// runtime.dispatcher().invalidate_tenant_caches("t1").await;
/// assert!(!runtime.store().exists(&key).await);
///
/// runtime.shutdown().await;
/// # }
/// ```
pub struct CacheRuntime {
    store: Arc<CacheStore>,
    rules: Arc<RuleRegistry>,
    dispatcher: Arc<InvalidationDispatcher>,
    queue: InvalidationQueue,
    reports: CachedReportService,
}

impl CacheRuntime {
    pub fn builder(config: StoreConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Connect to Redis with default options.
    #[cfg(feature = "redis")]
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        Self::builder(config).connect().await
    }

    /// Runtime over `backend` with default options.
    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: StoreConfig) -> StoreResult<Self> {
        Self::builder(config).start(backend)
    }

    /// Runtime over a fresh [`InMemoryBackend`] with default configuration.
    pub fn in_memory() -> Self {
        let store = Arc::new(CacheStore::new(
            Arc::new(InMemoryBackend::new()),
            StoreConfig::default(),
        ));
        Self::builder(StoreConfig::default()).assemble(store)
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn keys(&self) -> &KeyGenerator {
        self.store.keys()
    }

    pub fn rules(&self) -> &Arc<RuleRegistry> {
        &self.rules
    }

    pub fn dispatcher(&self) -> &Arc<InvalidationDispatcher> {
        &self.dispatcher
    }

    pub fn queue(&self) -> &InvalidationQueue {
        &self.queue
    }

    pub fn reports(&self) -> &CachedReportService {
        &self.reports
    }

    /// Queue `event` for background dispatch.
    pub async fn publish(&self, event: InvalidationEvent) -> InvalidationResult<()> {
        self.queue.submit(event).await
    }

    /// Queue `event` without waiting for room.
    pub fn try_publish(&self, event: InvalidationEvent) -> InvalidationResult<()> {
        self.queue.try_submit(event)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Stop accepting events and dispatch everything already queued.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}
