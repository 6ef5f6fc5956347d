//! Invalidation rules and the rule registry.

use crate::error::{InvalidationError, InvalidationResult};
use crate::event::EventType;
use crate::pattern::placeholders;
use carecache_log::{debug, info};
use carecache_store::KeyGenerator;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Tag names used by the default rules.
pub mod tags {
    pub const USERS: &str = "users";
    pub const TENANTS: &str = "tenants";
    pub const ROLES: &str = "roles";
    pub const PERMISSIONS: &str = "permissions";
    pub const CONVERSATIONS: &str = "conversations";
    pub const MESSAGES: &str = "messages";
    pub const NOTES: &str = "notes";
    pub const DIAGNOSTICS: &str = "diagnostics";
    pub const AUDIT: &str = "audit";
    pub const REPORTS: &str = "reports";
    pub const SYSTEM: &str = "system";
}

/// Keys and tags to clear when an event of `event_type` occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationRule {
    pub event_type: EventType,
    /// Pattern templates, deleted in order.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Hand the tags to the warmer instead of invalidating them directly.
    #[serde(default)]
    pub warm_after_invalidation: bool,
}

impl InvalidationRule {
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            patterns: Vec::new(),
            tags: BTreeSet::new(),
            warm_after_invalidation: false,
        }
    }

    pub fn pattern(mut self, template: impl Into<String>) -> Self {
        self.patterns.push(template.into());
        self
    }

    pub fn patterns<I, S>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(templates.into_iter().map(Into::into));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn warm_after_invalidation(mut self, warm: bool) -> Self {
        self.warm_after_invalidation = warm;
        self
    }

    /// Check the rule is usable: it clears something, and every template
    /// parses.
    pub fn validate(&self) -> InvalidationResult<()> {
        let invalid = |reason: String| InvalidationError::InvalidRule {
            event_type: self.event_type.to_string(),
            reason,
        };

        if self.event_type.as_str().trim().is_empty() {
            return Err(invalid("event type is empty".into()));
        }
        if self.patterns.is_empty() && self.tags.is_empty() {
            return Err(invalid("rule has neither patterns nor tags".into()));
        }
        for template in &self.patterns {
            if template.is_empty() {
                return Err(invalid("empty pattern".into()));
            }
            placeholders(template).map_err(|e| invalid(e.to_string()))?;
        }
        if self.tags.iter().any(|tag| tag.is_empty()) {
            return Err(invalid("empty tag name".into()));
        }
        Ok(())
    }
}

/// Event type to rule mapping. At most one rule per event type.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: RwLock<HashMap<EventType, InvalidationRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding [`default_rules`].
    pub fn with_default_rules(keys: &KeyGenerator) -> Self {
        let registry = Self::new();
        for rule in default_rules(keys) {
            if let Err(e) = registry.add_rule(rule) {
                carecache_log::error!("default invalidation rule rejected: {}", e);
            }
        }
        info!("registered {} default invalidation rules", registry.len());
        registry
    }

    /// Register `rule`, replacing any rule for the same event type.
    ///
    /// Returns the replaced rule. Last registration wins.
    pub fn add_rule(&self, rule: InvalidationRule) -> InvalidationResult<Option<InvalidationRule>> {
        rule.validate()?;
        let event_type = rule.event_type.clone();
        let replaced = self.rules.write().insert(event_type.clone(), rule);
        if replaced.is_some() {
            debug!("invalidation rule for {} replaced", event_type);
        }
        Ok(replaced)
    }

    pub fn remove_rule(&self, event_type: &EventType) -> Option<InvalidationRule> {
        self.rules.write().remove(event_type)
    }

    pub fn get(&self, event_type: &EventType) -> Option<InvalidationRule> {
        self.rules.read().get(event_type).cloned()
    }

    pub fn contains(&self, event_type: &EventType) -> bool {
        self.rules.read().contains_key(event_type)
    }

    /// Snapshot of every rule, ordered by event type.
    pub fn rules(&self) -> Vec<InvalidationRule> {
        let mut rules: Vec<_> = self.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.event_type.cmp(&b.event_type));
        rules
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

/// A filtered resource key, with and without its filter hash.
fn filtered(keys: &KeyGenerator, resource: &str, identifier: &str) -> [String; 2] {
    let base = keys.build(resource, identifier);
    let hashed = format!("{}:*", base);
    [base, hashed]
}

/// The rule table for the application's domain events.
///
/// Patterns are built under the key generator's prefix so they match what
/// [`KeyGenerator`] writes. `conversation.updated` expects a `tenantId`
/// metadata entry; `note.*` expect `patientId`; `report.updated` expects
/// `reportType` and `tenantId`. The named triggers on the dispatcher supply
/// them.
pub fn default_rules(keys: &KeyGenerator) -> Vec<InvalidationRule> {
    let id = "{entityId}";
    let user_lists = keys.pattern("users:list");

    vec![
        InvalidationRule::new(EventType::UserCreated)
            .pattern(user_lists.clone())
            .tag(tags::USERS),
        InvalidationRule::new(EventType::UserUpdated)
            .pattern(keys.user(id))
            .pattern(keys.user_permissions(id))
            .pattern(user_lists.clone())
            .tag(tags::USERS),
        InvalidationRule::new(EventType::UserDeleted)
            .pattern(keys.user(id))
            .pattern(keys.user_permissions(id))
            .pattern(user_lists)
            .tag(tags::USERS),
        InvalidationRule::new(EventType::TenantCreated)
            .pattern(keys.build("tenants", "list*"))
            .tag(tags::TENANTS),
        InvalidationRule::new(EventType::TenantUpdated)
            .pattern(keys.tenant(id))
            .pattern(keys.tenant_settings(id))
            .pattern(keys.build("tenants", "list*"))
            .pattern(keys.dashboard(id))
            .tag(tags::TENANTS)
            .warm_after_invalidation(true),
        InvalidationRule::new(EventType::TenantDeleted)
            .pattern(keys.tenant(id))
            .pattern(keys.tenant_settings(id))
            .pattern(keys.build("tenants", "list*"))
            .pattern(keys.dashboard(id))
            .patterns(filtered(keys, "users", "list:{entityId}"))
            .patterns(filtered(keys, "conversations", "list:{entityId}"))
            .patterns(filtered(keys, "audit", id))
            .patterns(filtered(keys, "report", "*:{entityId}"))
            .tag(tags::TENANTS)
            .tag(tags::USERS)
            .tag(tags::REPORTS),
        InvalidationRule::new(EventType::RoleUpdated)
            .pattern(keys.role(id))
            .pattern(keys.pattern("permissions"))
            .tag(tags::ROLES)
            .tag(tags::PERMISSIONS),
        InvalidationRule::new(EventType::RoleDeleted)
            .pattern(keys.role(id))
            .pattern(keys.pattern("permissions"))
            .tag(tags::ROLES)
            .tag(tags::PERMISSIONS),
        InvalidationRule::new(EventType::PermissionsChanged)
            .pattern(keys.user_permissions(id))
            .tag(tags::PERMISSIONS),
        InvalidationRule::new(EventType::ConversationCreated)
            .pattern(keys.pattern("conversations:list"))
            .tag(tags::CONVERSATIONS),
        InvalidationRule::new(EventType::ConversationUpdated)
            .pattern(keys.conversation(id))
            .patterns(filtered(keys, "conversations", "list:{tenantId}"))
            .tag(tags::CONVERSATIONS),
        InvalidationRule::new(EventType::MessageCreated)
            .patterns(filtered(keys, "messages", id))
            .tag(tags::MESSAGES),
        InvalidationRule::new(EventType::ClinicalNoteCreated)
            .patterns(filtered(keys, "notes", "patient:{patientId}"))
            .tag(tags::NOTES),
        InvalidationRule::new(EventType::ClinicalNoteUpdated)
            .pattern(keys.clinical_note(id))
            .patterns(filtered(keys, "notes", "patient:{patientId}"))
            .tag(tags::NOTES),
        InvalidationRule::new(EventType::DiagnosticCreated).tag(tags::DIAGNOSTICS),
        InvalidationRule::new(EventType::DiagnosticUpdated)
            .pattern(keys.diagnostic(id))
            .tag(tags::DIAGNOSTICS),
        InvalidationRule::new(EventType::AuditLogCreated).tag(tags::AUDIT),
        InvalidationRule::new(EventType::ReportUpdated)
            .patterns(filtered(keys, "report", "{reportType}:{tenantId}"))
            .pattern(keys.dashboard("{tenantId}"))
            .tag(tags::REPORTS),
        InvalidationRule::new(EventType::SystemConfigUpdated)
            .pattern(keys.pattern("system"))
            .tag(tags::SYSTEM)
            .warm_after_invalidation(true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_registration_wins() {
        let registry = RuleRegistry::new();
        let first = InvalidationRule::new("tenant.updated").pattern("saas:tenant:{entityId}");
        let second = InvalidationRule::new("tenant.updated").tag("TENANTS");

        assert_eq!(registry.add_rule(first.clone()).unwrap(), None);
        assert_eq!(registry.add_rule(second.clone()).unwrap(), Some(first));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&EventType::TenantUpdated), Some(second));
    }

    #[test]
    fn test_invalid_rules_are_rejected() {
        let registry = RuleRegistry::new();

        let empty = InvalidationRule::new("user.updated");
        assert!(matches!(
            registry.add_rule(empty),
            Err(InvalidationError::InvalidRule { .. })
        ));

        let malformed = InvalidationRule::new("user.updated").pattern("saas:user:{entityId");
        assert!(registry.add_rule(malformed).is_err());

        let unnamed = InvalidationRule::new("").tag("x");
        assert!(registry.add_rule(unnamed).is_err());

        assert!(registry.is_empty());
    }

    #[test]
    fn test_default_rules_cover_known_events() {
        let keys = KeyGenerator::default();
        let registry = RuleRegistry::with_default_rules(&keys);

        assert_eq!(registry.len(), EventType::KNOWN.len());
        for rule in default_rules(&keys) {
            rule.validate().unwrap();
        }

        let tenant = registry.get(&EventType::TenantUpdated).unwrap();
        assert_eq!(tenant.patterns[0], "saas:tenant:{entityId}");
        assert!(tenant.warm_after_invalidation);
        assert!(tenant.tags.contains(tags::TENANTS));
    }

    #[test]
    fn test_default_rules_follow_prefix() {
        let keys = KeyGenerator::new("clinic");
        let rules = default_rules(&keys);
        assert!(
            rules
                .iter()
                .flat_map(|rule| &rule.patterns)
                .all(|pattern| pattern.starts_with("clinic:"))
        );
    }

    #[test]
    fn test_rules_snapshot_is_ordered() {
        let registry = RuleRegistry::new();
        registry.add_rule(InvalidationRule::new("z.custom").tag("z")).unwrap();
        registry.add_rule(InvalidationRule::new(EventType::UserCreated).tag("users")).unwrap();

        let rules = registry.rules();
        assert_eq!(rules[0].event_type, EventType::UserCreated);
        assert_eq!(rules[1].event_type, EventType::Custom("z.custom".into()));
    }
}
