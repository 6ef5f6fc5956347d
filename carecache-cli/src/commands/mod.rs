//! CLI command implementations.

pub mod inspect;
pub mod invalidate;
pub mod maintenance;

use crate::error::CliResult;
use carecache_invalidation::{InvalidationDispatcher, RuleRegistry};
use carecache_store::{CacheStore, StoreConfig};
use std::sync::Arc;

/// Where to connect, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub redis_url: Option<String>,
    pub prefix: Option<String>,
}

impl Target {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> CliResult<StoreConfig> {
        let mut builder = StoreConfig::from_env();
        if let Some(url) = &self.redis_url {
            builder = builder.url(url.clone());
        }
        if let Some(prefix) = &self.prefix {
            builder = builder.key_prefix(prefix.clone());
        }
        Ok(builder.try_build()?)
    }
}

/// A connected store plus a dispatcher over the default rules.
pub struct Session {
    pub store: Arc<CacheStore>,
    pub dispatcher: InvalidationDispatcher,
    pub json: bool,
}

impl Session {
    pub async fn open(target: &Target, json: bool) -> CliResult<Self> {
        let store = Arc::new(CacheStore::connect(target.config()?).await?);
        let rules = Arc::new(RuleRegistry::with_default_rules(store.keys()));
        Ok(Self {
            dispatcher: InvalidationDispatcher::new(store.clone(), rules),
            store,
            json,
        })
    }
}
