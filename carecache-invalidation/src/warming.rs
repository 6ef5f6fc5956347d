//! Cache warming contract.

use crate::error::InvalidationResult;
use async_trait::async_trait;
use carecache_store::CacheStore;
use std::sync::Arc;

/// Collaborator that repopulates hot entries after invalidation.
///
/// `invalidate_by_tags_and_warm` owns both steps: it must finish
/// invalidating before it starts warming.
#[async_trait]
pub trait CacheWarmer: Send + Sync {
    async fn invalidate_by_tags_and_warm(&self, tags: &[String]) -> InvalidationResult<()>;

    async fn warm_critical_caches(&self) -> InvalidationResult<()>;
}

/// Warmer that only invalidates.
///
/// The default collaborator, so rules with `warm_after_invalidation` still
/// clear their tags when no real warmer is wired in.
pub struct StoreOnlyWarmer {
    store: Arc<CacheStore>,
}

impl StoreOnlyWarmer {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CacheWarmer for StoreOnlyWarmer {
    async fn invalidate_by_tags_and_warm(&self, tags: &[String]) -> InvalidationResult<()> {
        self.store.try_invalidate_by_tags(tags).await?;
        Ok(())
    }

    async fn warm_critical_caches(&self) -> InvalidationResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carecache_store::SetOptions;

    #[tokio::test]
    async fn test_store_only_warmer_invalidates() {
        let store = Arc::new(CacheStore::in_memory());
        store
            .set("saas:tenant:t1", &"t", SetOptions::new().tag("tenants"))
            .await;

        let warmer = StoreOnlyWarmer::new(store.clone());
        warmer
            .invalidate_by_tags_and_warm(&["tenants".to_string()])
            .await
            .unwrap();
        warmer.warm_critical_caches().await.unwrap();

        assert!(!store.exists("saas:tenant:t1").await);
    }
}
