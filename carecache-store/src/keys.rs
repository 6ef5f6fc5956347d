//! Deterministic cache key construction.
//!
//! Keys follow `prefix:resource:identifier[:filterHash]`. Filter objects are
//! canonicalized (object keys sorted recursively, compact JSON) before
//! hashing, so `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the same key.
//!
//! Tag index keys live in a parallel, unprefixed namespace: `tag:<name>`.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Namespace for tag index sets.
pub const TAG_NAMESPACE: &str = "tag";

/// Hex characters of the SHA-256 digest kept in a filter hash.
const FILTER_HASH_LEN: usize = 16;

/// Builds namespaced cache keys. Pure; no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenerator {
    prefix: String,
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `prefix:resource:identifier`
    pub fn build(&self, resource: &str, identifier: &str) -> String {
        format!("{}:{}:{}", self.prefix, resource, identifier)
    }

    /// `prefix:resource:identifier:filterHash`
    ///
    /// An empty object or `null` filter yields the unfiltered key.
    pub fn build_filtered(&self, resource: &str, identifier: &str, filters: &Value) -> String {
        if is_empty_filter(filters) {
            return self.build(resource, identifier);
        }
        format!(
            "{}:{}",
            self.build(resource, identifier),
            filter_hash(filters)
        )
    }

    /// Glob matching every key of a resource: `prefix:resource:*`.
    pub fn pattern(&self, resource: &str) -> String {
        format!("{}:{}:*", self.prefix, resource)
    }

    // Domain keys

    pub fn user(&self, user_id: &str) -> String {
        self.build("user", user_id)
    }

    pub fn user_list(&self, tenant_id: &str, filters: &Value) -> String {
        self.build_filtered("users", &format!("list:{}", tenant_id), filters)
    }

    pub fn user_permissions(&self, user_id: &str) -> String {
        self.build("permissions", user_id)
    }

    pub fn tenant(&self, tenant_id: &str) -> String {
        self.build("tenant", tenant_id)
    }

    pub fn tenant_settings(&self, tenant_id: &str) -> String {
        self.build("tenant_settings", tenant_id)
    }

    pub fn tenant_list(&self, filters: &Value) -> String {
        self.build_filtered("tenants", "list", filters)
    }

    pub fn role(&self, role_id: &str) -> String {
        self.build("role", role_id)
    }

    pub fn conversation(&self, conversation_id: &str) -> String {
        self.build("conversation", conversation_id)
    }

    pub fn conversation_list(&self, tenant_id: &str, filters: &Value) -> String {
        self.build_filtered("conversations", &format!("list:{}", tenant_id), filters)
    }

    pub fn messages(&self, conversation_id: &str, filters: &Value) -> String {
        self.build_filtered("messages", conversation_id, filters)
    }

    pub fn clinical_note(&self, note_id: &str) -> String {
        self.build("note", note_id)
    }

    pub fn notes_for_patient(&self, patient_id: &str, filters: &Value) -> String {
        self.build_filtered("notes", &format!("patient:{}", patient_id), filters)
    }

    pub fn diagnostic(&self, diagnostic_id: &str) -> String {
        self.build("diagnostic", diagnostic_id)
    }

    pub fn audit_log(&self, tenant_id: &str, filters: &Value) -> String {
        self.build_filtered("audit", tenant_id, filters)
    }

    pub fn report(&self, report_type: &str, tenant_id: &str, filters: &Value) -> String {
        self.build_filtered("report", &format!("{}:{}", report_type, tenant_id), filters)
    }

    pub fn dashboard(&self, tenant_id: &str) -> String {
        self.build("dashboard", tenant_id)
    }

    pub fn system_config(&self, name: &str) -> String {
        self.build("system", name)
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new("saas")
    }
}

/// Key of the set holding the members of `tag`.
pub fn tag_key(tag: &str) -> String {
    format!("{}:{}", TAG_NAMESPACE, tag)
}

/// Stable short hash of a filter object.
pub fn filter_hash(filters: &Value) -> String {
    let canonical = canonical_json(filters);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(FILTER_HASH_LEN);
    hash
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn is_empty_filter(filters: &Value) -> bool {
    match filters {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
