//! Rule-driven cache invalidation.
//!
//! Domain write paths describe what changed as an [`InvalidationEvent`]; the
//! [`InvalidationDispatcher`] looks up the event's [`InvalidationRule`],
//! deletes the keys its pattern templates resolve to, invalidates its tags
//! (optionally through a [`CacheWarmer`]) and keeps dispatch statistics.
//!
//! - **Typed registry** - [`EventType`] keys, rules validated on insert,
//!   last registration wins
//! - **Pattern templates** - `{entityId}`, `{entityType}`, `{metadataKey}`
//! - **Named triggers** - `invalidate_user_caches`, `smart_invalidate`, ...
//! - **Background queue** - bounded, with a block or drop-oldest policy
//!
//! # Example
//!
//! ```
//! use carecache_invalidation::*;
//! use carecache_store::{CacheStore, SetOptions};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let store = Arc::new(CacheStore::in_memory());
//! let rules = Arc::new(RuleRegistry::new());
//! rules
//!     .add_rule(
//!         InvalidationRule::new("tenant.updated")
//!             .pattern("saas:tenant:{entityId}")
//!             .tag("TENANTS"),
//!     )
//!     .unwrap();
//!
//! let dispatcher = InvalidationDispatcher::new(store.clone(), rules);
//! store.set("saas:tenant:t1", &"Acme", SetOptions::new()).await;
//!
//! let outcome = dispatcher
//!     .handle_event(&InvalidationEvent::new("tenant.updated").with_entity_id("t1"))
//!     .await;
//! assert!(outcome.is_success());
//! assert!(!store.exists("saas:tenant:t1").await);
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod pattern;
pub mod queue;
pub mod rule;
pub mod stats;
pub mod warming;

pub use dispatcher::{DispatchOutcome, DispatchReport, DispatcherConfig, InvalidationDispatcher};
pub use error::{InvalidationError, InvalidationResult};
pub use event::{EventType, InvalidationEvent};
pub use pattern::{PlaceholderPolicy, placeholders, resolve_pattern};
pub use queue::{FullPolicy, InvalidationQueue, QueueConfig, QueueStats};
pub use rule::{InvalidationRule, RuleRegistry, default_rules, tags};
pub use stats::InvalidationStats;
pub use warming::{CacheWarmer, StoreOnlyWarmer};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::dispatcher::{DispatchOutcome, DispatcherConfig, InvalidationDispatcher};
    pub use crate::error::{InvalidationError, InvalidationResult};
    pub use crate::event::{EventType, InvalidationEvent};
    pub use crate::pattern::PlaceholderPolicy;
    pub use crate::queue::{FullPolicy, InvalidationQueue, QueueConfig};
    pub use crate::rule::{InvalidationRule, RuleRegistry};
    pub use crate::stats::InvalidationStats;
    pub use crate::warming::{CacheWarmer, StoreOnlyWarmer};
}
