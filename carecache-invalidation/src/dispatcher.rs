//! Event dispatch: rule lookup, pattern deletion, tag invalidation, warming.

use crate::event::{EventType, InvalidationEvent};
use crate::pattern::{PlaceholderPolicy, resolve_pattern};
use crate::rule::{InvalidationRule, RuleRegistry};
use crate::stats::{InvalidationStats, StatsRecorder};
use crate::warming::{CacheWarmer, StoreOnlyWarmer};
use carecache_log::{debug, error, info, warn};
use carecache_store::CacheStore;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Handling of placeholders the event has no value for
    pub placeholder_policy: PlaceholderPolicy,

    /// Warm critical caches after `clear_all_caches`
    pub warm_on_clear: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            placeholder_policy: PlaceholderPolicy::Reject,
            warm_on_clear: true,
        }
    }
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub event_type: EventType,
    /// Resolved patterns that were deleted.
    pub patterns: Vec<String>,
    /// Keys removed by pattern deletion and direct tag invalidation.
    pub keys_deleted: u64,
    pub tags: Vec<String>,
    /// Tags went through the warmer.
    pub warmed: bool,
    pub errors: Vec<String>,
}

impl DispatchReport {
    fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            patterns: Vec::new(),
            keys_deleted: 0,
            tags: Vec::new(),
            warmed: false,
            errors: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// No rule for the event type; nothing was touched.
    NoRule,
    Dispatched(DispatchReport),
}

impl DispatchOutcome {
    pub fn report(&self) -> Option<&DispatchReport> {
        match self {
            DispatchOutcome::NoRule => None,
            DispatchOutcome::Dispatched(report) => Some(report),
        }
    }

    pub fn is_success(&self) -> bool {
        self.report().is_some_and(DispatchReport::succeeded)
    }
}

/// Routes invalidation events to the store through the rule table.
///
/// Nothing here returns an error or panics into the caller: failures are
/// logged, listed in the [`DispatchReport`] and counted in
/// [`InvalidationStats`].
pub struct InvalidationDispatcher {
    store: Arc<CacheStore>,
    rules: Arc<RuleRegistry>,
    warmer: Arc<dyn CacheWarmer>,
    config: DispatcherConfig,
    stats: StatsRecorder,
}

impl InvalidationDispatcher {
    /// Dispatcher with a [`StoreOnlyWarmer`] and default configuration.
    pub fn new(store: Arc<CacheStore>, rules: Arc<RuleRegistry>) -> Self {
        Self {
            warmer: Arc::new(StoreOnlyWarmer::new(store.clone())),
            store,
            rules,
            config: DispatcherConfig::default(),
            stats: StatsRecorder::default(),
        }
    }

    pub fn with_warmer(mut self, warmer: Arc<dyn CacheWarmer>) -> Self {
        self.warmer = warmer;
        self
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn rules(&self) -> &Arc<RuleRegistry> {
        &self.rules
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Apply the rule registered for `event.event_type`.
    ///
    /// Patterns are deleted first, in rule order. A failed pattern does not
    /// stop the remaining patterns or the tag step. Warming starts only
    /// after every pattern deletion has returned.
    pub async fn handle_event(&self, event: &InvalidationEvent) -> DispatchOutcome {
        let Some(rule) = self.rules.get(&event.event_type) else {
            debug!("no invalidation rule for {}", event.event_type);
            return DispatchOutcome::NoRule;
        };

        let mut report = DispatchReport::new(event.event_type.clone());
        self.delete_patterns(&rule, event, &mut report).await;
        self.invalidate_tags(&rule, &mut report).await;

        self.stats.record(report.succeeded());
        if report.succeeded() {
            info!(
                "invalidated {}: {} keys deleted, {} tags",
                report.event_type,
                report.keys_deleted,
                report.tags.len()
            );
        } else {
            warn!(
                "invalidation of {} finished with {} errors",
                report.event_type,
                report.errors.len()
            );
        }

        DispatchOutcome::Dispatched(report)
    }

    async fn delete_patterns(
        &self,
        rule: &InvalidationRule,
        event: &InvalidationEvent,
        report: &mut DispatchReport,
    ) {
        for template in &rule.patterns {
            let pattern = match resolve_pattern(template, event, self.config.placeholder_policy) {
                Ok(pattern) => pattern,
                Err(e) => {
                    warn!("skipping pattern for {}: {}", event.event_type, e);
                    report.errors.push(e.to_string());
                    continue;
                }
            };

            match self.store.try_del_pattern(&pattern).await {
                Ok(deleted) => {
                    debug!("pattern {} deleted {} keys", pattern, deleted);
                    report.keys_deleted += deleted;
                    report.patterns.push(pattern);
                }
                Err(e) => {
                    error!("deleting pattern {} failed: {}", pattern, e);
                    report.keys_deleted += e.deleted_before_failure();
                    report.errors.push(format!("{}: {}", pattern, e));
                }
            }
        }
    }

    async fn invalidate_tags(&self, rule: &InvalidationRule, report: &mut DispatchReport) {
        if rule.tags.is_empty() {
            return;
        }
        let tags: Vec<String> = rule.tags.iter().cloned().collect();

        if rule.warm_after_invalidation {
            let warming = AssertUnwindSafe(self.warmer.invalidate_by_tags_and_warm(&tags))
                .catch_unwind()
                .await;
            match warming {
                Ok(Ok(())) => report.warmed = true,
                Ok(Err(e)) => {
                    error!("invalidate-and-warm of {:?} failed: {}", tags, e);
                    report.errors.push(e.to_string());
                }
                Err(_) => {
                    error!("cache warmer panicked on {:?}", tags);
                    report.errors.push("cache warmer panicked".to_string());
                }
            }
        } else {
            match self.store.try_invalidate_by_tags(&tags).await {
                Ok(deleted) => report.keys_deleted += deleted,
                Err(e) => {
                    error!("invalidating tags {:?} failed: {}", tags, e);
                    report.keys_deleted += e.deleted_before_failure();
                    report.errors.push(e.to_string());
                }
            }
        }
        report.tags = tags;
    }

    // ========== Named triggers ==========

    pub async fn invalidate_user_caches(&self, user_id: &str) -> DispatchOutcome {
        self.handle_event(
            &InvalidationEvent::new(EventType::UserUpdated)
                .with_entity_id(user_id)
                .with_entity_type("user"),
        )
        .await
    }

    pub async fn invalidate_tenant_caches(&self, tenant_id: &str) -> DispatchOutcome {
        self.handle_event(
            &InvalidationEvent::new(EventType::TenantUpdated)
                .with_entity_id(tenant_id)
                .with_entity_type("tenant"),
        )
        .await
    }

    pub async fn invalidate_role_caches(&self, role_id: &str) -> DispatchOutcome {
        self.handle_event(
            &InvalidationEvent::new(EventType::RoleUpdated)
                .with_entity_id(role_id)
                .with_entity_type("role"),
        )
        .await
    }

    pub async fn invalidate_conversation_caches(
        &self,
        conversation_id: &str,
        tenant_id: &str,
    ) -> DispatchOutcome {
        self.handle_event(
            &InvalidationEvent::new(EventType::ConversationUpdated)
                .with_entity_id(conversation_id)
                .with_entity_type("conversation")
                .with_metadata("tenantId", tenant_id),
        )
        .await
    }

    pub async fn invalidate_note_caches(&self, note_id: &str, patient_id: &str) -> DispatchOutcome {
        self.handle_event(
            &InvalidationEvent::new(EventType::ClinicalNoteUpdated)
                .with_entity_id(note_id)
                .with_entity_type("note")
                .with_metadata("patientId", patient_id),
        )
        .await
    }

    pub async fn invalidate_diagnostic_caches(
        &self,
        diagnostic_id: &str,
        patient_id: &str,
    ) -> DispatchOutcome {
        self.handle_event(
            &InvalidationEvent::new(EventType::DiagnosticUpdated)
                .with_entity_id(diagnostic_id)
                .with_entity_type("diagnostic")
                .with_metadata("patientId", patient_id),
        )
        .await
    }

    pub async fn invalidate_report_caches(&self, report_type: &str, tenant_id: &str) -> DispatchOutcome {
        self.handle_event(
            &InvalidationEvent::new(EventType::ReportUpdated)
                .with_entity_id(tenant_id)
                .with_entity_type("report")
                .with_metadata("reportType", report_type)
                .with_metadata("tenantId", tenant_id),
        )
        .await
    }

    pub async fn invalidate_system_caches(&self) -> DispatchOutcome {
        self.handle_event(&InvalidationEvent::new(EventType::SystemConfigUpdated))
            .await
    }

    /// Dispatch `"{collection}.{operation}"` for a write to `document_id`.
    ///
    /// The bridge for write paths without a named trigger. Changed field
    /// names, if any, are passed as the comma-joined `fields` metadata entry.
    pub async fn smart_invalidate<S: AsRef<str>>(
        &self,
        collection: &str,
        operation: &str,
        document_id: &str,
        fields: &[S],
    ) -> DispatchOutcome {
        let mut event = InvalidationEvent::new(format!("{}.{}", collection, operation).as_str())
            .with_entity_id(document_id)
            .with_entity_type(collection);
        if !fields.is_empty() {
            let joined = fields.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",");
            event = event.with_metadata("fields", joined);
        }
        self.handle_event(&event).await
    }

    // ========== Administration ==========

    pub fn invalidation_stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }

    pub fn invalidation_rules(&self) -> Vec<InvalidationRule> {
        self.rules.rules()
    }

    /// Flush the whole cache, then warm critical entries.
    pub async fn clear_all_caches(&self) -> bool {
        if let Err(e) = self.store.try_clear().await {
            error!("clearing all caches failed: {}", e);
            return false;
        }
        info!("all caches cleared");

        if self.config.warm_on_clear
            && let Err(e) = self.warmer.warm_critical_caches().await
        {
            warn!("warming after clear failed: {}", e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carecache_store::{KeyGenerator, SetOptions};

    fn dispatcher() -> InvalidationDispatcher {
        let store = Arc::new(CacheStore::in_memory());
        let rules = Arc::new(RuleRegistry::with_default_rules(&KeyGenerator::default()));
        InvalidationDispatcher::new(store, rules)
    }

    #[tokio::test]
    async fn test_unregistered_event_is_a_no_op() {
        let dispatcher = dispatcher();
        dispatcher
            .store()
            .set("saas:user:1", &"u", SetOptions::new().tag("users"))
            .await;

        let outcome = dispatcher
            .handle_event(&InvalidationEvent::new("nonexistent.event"))
            .await;

        assert_eq!(outcome, DispatchOutcome::NoRule);
        assert!(dispatcher.store().exists("saas:user:1").await);
        assert_eq!(dispatcher.invalidation_stats().total_invalidations, 0);
    }

    #[tokio::test]
    async fn test_user_trigger_clears_user_keys() {
        let dispatcher = dispatcher();
        let store = dispatcher.store().clone();
        let keys = store.keys().clone();

        store.set(&keys.user("42"), &"amara", SetOptions::new()).await;
        store.set(&keys.user_permissions("42"), &["read"], SetOptions::new()).await;
        store
            .set(&keys.user_list("t1", &serde_json::json!({"page": 1})), &["42"], SetOptions::new())
            .await;
        store.set(&keys.user("43"), &"other", SetOptions::new()).await;

        let outcome = dispatcher.invalidate_user_caches("42").await;
        let report = outcome.report().unwrap();

        assert!(outcome.is_success());
        assert_eq!(report.keys_deleted, 3);
        assert!(!store.exists(&keys.user("42")).await);
        assert!(store.exists(&keys.user("43")).await);
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_is_counted_as_failure() {
        let dispatcher = dispatcher();
        let store = dispatcher.store().clone();
        store.set("saas:conversation:c1", &"c", SetOptions::new()).await;

        // No tenantId metadata for the list pattern.
        let outcome = dispatcher
            .handle_event(&InvalidationEvent::new(EventType::ConversationUpdated).with_entity_id("c1"))
            .await;

        let report = outcome.report().unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.errors.len(), 2);
        assert!(!store.exists("saas:conversation:c1").await);

        let stats = dispatcher.invalidation_stats();
        assert_eq!(stats.total_invalidations, 1);
        assert_eq!(stats.failed_invalidations, 1);
    }

    #[tokio::test]
    async fn test_pass_through_policy_keeps_literal_placeholder() {
        let dispatcher = dispatcher().with_config(DispatcherConfig {
            placeholder_policy: PlaceholderPolicy::PassThrough,
            ..Default::default()
        });

        let outcome = dispatcher
            .handle_event(&InvalidationEvent::new(EventType::ConversationUpdated).with_entity_id("c1"))
            .await;
        let report = outcome.report().unwrap();

        assert!(report.succeeded());
        assert!(
            report
                .patterns
                .contains(&"saas:conversations:list:{tenantId}:*".to_string())
        );
    }

    #[tokio::test]
    async fn test_smart_invalidate_builds_event_type() {
        let dispatcher = dispatcher();
        let store = dispatcher.store().clone();
        store.set("saas:tenant:t9", &"t", SetOptions::new()).await;

        let outcome = dispatcher
            .smart_invalidate("tenant", "updated", "t9", &["name", "plan"])
            .await;
        assert!(outcome.is_success());
        assert!(!store.exists("saas:tenant:t9").await);

        let none: &[&str] = &[];
        let outcome = dispatcher
            .smart_invalidate("invoice", "paid", "i1", none)
            .await;
        assert_eq!(outcome, DispatchOutcome::NoRule);
    }

    #[tokio::test]
    async fn test_report_trigger_scopes_to_type_and_tenant() {
        let dispatcher = dispatcher();
        let store = dispatcher.store().clone();
        let keys = store.keys().clone();
        let filters = serde_json::json!({"month": 3});

        store.set(&keys.report("revenue", "t1", &filters), &1, SetOptions::new()).await;
        store.set(&keys.report("revenue", "t2", &filters), &2, SetOptions::new()).await;
        store.set(&keys.report("usage", "t1", &filters), &3, SetOptions::new()).await;

        let outcome = dispatcher.invalidate_report_caches("revenue", "t1").await;
        assert!(outcome.is_success());

        assert!(!store.exists(&keys.report("revenue", "t1", &filters)).await);
        assert!(store.exists(&keys.report("revenue", "t2", &filters)).await);
        assert!(store.exists(&keys.report("usage", "t1", &filters)).await);
    }

    #[tokio::test]
    async fn test_clear_all_caches() {
        let dispatcher = dispatcher();
        dispatcher.store().set("a", &1, SetOptions::new()).await;

        assert!(dispatcher.clear_all_caches().await);
        assert!(!dispatcher.store().exists("a").await);
    }
}
