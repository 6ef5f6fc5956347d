//! Invalidation events and their types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Domain event that may require cache invalidation.
///
/// Known events have their own variant; anything else round-trips through
/// [`EventType::Custom`], so every wire name maps to exactly one type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    UserCreated,
    UserUpdated,
    UserDeleted,
    TenantCreated,
    TenantUpdated,
    TenantDeleted,
    RoleUpdated,
    RoleDeleted,
    PermissionsChanged,
    ConversationCreated,
    ConversationUpdated,
    MessageCreated,
    ClinicalNoteCreated,
    ClinicalNoteUpdated,
    DiagnosticCreated,
    DiagnosticUpdated,
    AuditLogCreated,
    ReportUpdated,
    SystemConfigUpdated,
    Custom(String),
}

impl EventType {
    /// Every built-in type, in declaration order.
    pub const KNOWN: [EventType; 19] = [
        EventType::UserCreated,
        EventType::UserUpdated,
        EventType::UserDeleted,
        EventType::TenantCreated,
        EventType::TenantUpdated,
        EventType::TenantDeleted,
        EventType::RoleUpdated,
        EventType::RoleDeleted,
        EventType::PermissionsChanged,
        EventType::ConversationCreated,
        EventType::ConversationUpdated,
        EventType::MessageCreated,
        EventType::ClinicalNoteCreated,
        EventType::ClinicalNoteUpdated,
        EventType::DiagnosticCreated,
        EventType::DiagnosticUpdated,
        EventType::AuditLogCreated,
        EventType::ReportUpdated,
        EventType::SystemConfigUpdated,
    ];

    /// Dotted wire name, e.g. `tenant.updated`.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::UserCreated => "user.created",
            EventType::UserUpdated => "user.updated",
            EventType::UserDeleted => "user.deleted",
            EventType::TenantCreated => "tenant.created",
            EventType::TenantUpdated => "tenant.updated",
            EventType::TenantDeleted => "tenant.deleted",
            EventType::RoleUpdated => "role.updated",
            EventType::RoleDeleted => "role.deleted",
            EventType::PermissionsChanged => "permissions.changed",
            EventType::ConversationCreated => "conversation.created",
            EventType::ConversationUpdated => "conversation.updated",
            EventType::MessageCreated => "message.created",
            EventType::ClinicalNoteCreated => "note.created",
            EventType::ClinicalNoteUpdated => "note.updated",
            EventType::DiagnosticCreated => "diagnostic.created",
            EventType::DiagnosticUpdated => "diagnostic.updated",
            EventType::AuditLogCreated => "audit.created",
            EventType::ReportUpdated => "report.updated",
            EventType::SystemConfigUpdated => "system.updated",
            EventType::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, EventType::Custom(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::KNOWN
            .iter()
            .find(|known| known.as_str() == s)
            .cloned()
            .unwrap_or_else(|| EventType::Custom(s.to_string())))
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(event_type) => event_type,
            Err(never) => match never {},
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EventType::from(name.as_str()))
    }
}

/// A domain write that has completed and may have made cached data stale.
///
/// Created per invalidation call and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl InvalidationEvent {
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            entity_id: None,
            entity_type: None,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
