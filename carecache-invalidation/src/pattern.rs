//! Pattern template resolution.
//!
//! A template is a key glob with `{name}` placeholders, e.g.
//! `saas:users:list:{tenantId}*`. `{entityId}` and `{entityType}` come from
//! the event's fields; any other name is looked up in its metadata.

use crate::error::{InvalidationError, InvalidationResult};
use crate::event::InvalidationEvent;
use carecache_store::glob_escape;
use serde::{Deserialize, Serialize};

pub const ENTITY_ID: &str = "entityId";
pub const ENTITY_TYPE: &str = "entityType";

/// What to do with a placeholder the event has no value for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderPolicy {
    /// Fail resolution; the pattern is skipped.
    #[default]
    Reject,
    /// Leave `{name}` in the pattern. It then matches no real key.
    PassThrough,
}

/// Placeholder names in `template`, in order of appearance.
pub fn placeholders(template: &str) -> InvalidationResult<Vec<&str>> {
    let mut names = Vec::new();
    for segment in split(template)? {
        if let Segment::Placeholder(name) = segment {
            names.push(name);
        }
    }
    Ok(names)
}

/// Substitute event values into `template`.
///
/// Substituted values are glob-escaped, so an id containing `*` cannot widen
/// the deletion.
///
/// ```
/// use carecache_invalidation::{InvalidationEvent, PlaceholderPolicy, resolve_pattern};
///
/// let event = InvalidationEvent::new("tenant.updated").with_entity_id("t1");
/// let key = resolve_pattern("saas:tenant:{entityId}", &event, PlaceholderPolicy::Reject).unwrap();
/// assert_eq!(key, "saas:tenant:t1");
/// ```
pub fn resolve_pattern(
    template: &str,
    event: &InvalidationEvent,
    policy: PlaceholderPolicy,
) -> InvalidationResult<String> {
    let mut resolved = String::with_capacity(template.len());
    for segment in split(template)? {
        match segment {
            Segment::Literal(text) => resolved.push_str(text),
            Segment::Placeholder(name) => match lookup(event, name) {
                Some(value) => resolved.push_str(&glob_escape(value)),
                None => match policy {
                    PlaceholderPolicy::Reject => {
                        return Err(InvalidationError::UnresolvedPlaceholder {
                            template: template.to_string(),
                            placeholder: name.to_string(),
                        });
                    }
                    PlaceholderPolicy::PassThrough => {
                        resolved.push('{');
                        resolved.push_str(name);
                        resolved.push('}');
                    }
                },
            },
        }
    }
    Ok(resolved)
}

fn lookup<'a>(event: &'a InvalidationEvent, name: &str) -> Option<&'a str> {
    match name {
        ENTITY_ID => event.entity_id.as_deref(),
        ENTITY_TYPE => event.entity_type.as_deref(),
        other => event.metadata.get(other).map(String::as_str),
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn split(template: &str) -> InvalidationResult<Vec<Segment<'_>>> {
    let malformed = |reason: &str| InvalidationError::MalformedPattern {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find(['{', '}']) {
        if rest[open..].starts_with('}') {
            return Err(malformed("unmatched '}'"));
        }
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| malformed("unterminated placeholder"))?;
        let name = &after[..close];
        if name.is_empty() {
            return Err(malformed("empty placeholder"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed("placeholder names are alphanumeric"));
        }
        segments.push(Segment::Placeholder(name));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}
