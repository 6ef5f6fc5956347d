//! Manual invalidation: dispatch an event or a smart invalidation.

use super::Session;
use crate::error::{CliError, CliResult};
use crate::output;
use carecache_invalidation::{DispatchOutcome, InvalidationEvent};
use colored::Colorize;

/// Parse a `key=value` metadata argument.
pub fn parse_meta(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", arg)),
    }
}

pub async fn event(
    session: &Session,
    event_type: &str,
    entity_id: Option<String>,
    entity_type: Option<String>,
    metadata: Vec<(String, String)>,
) -> CliResult<()> {
    let mut event = InvalidationEvent::new(event_type);
    event.entity_id = entity_id;
    event.entity_type = entity_type;
    event.metadata.extend(metadata);

    let outcome = session.dispatcher.handle_event(&event).await;
    report(session, &outcome)
}

pub async fn smart(
    session: &Session,
    collection: &str,
    operation: &str,
    document_id: &str,
    fields: &[String],
) -> CliResult<()> {
    let outcome = session
        .dispatcher
        .smart_invalidate(collection, operation, document_id, fields)
        .await;
    report(session, &outcome)
}

fn report(session: &Session, outcome: &DispatchOutcome) -> CliResult<()> {
    if session.json {
        output::json(outcome)?;
    } else {
        match outcome {
            DispatchOutcome::NoRule => output::warn("no rule registered for this event; nothing done"),
            DispatchOutcome::Dispatched(report) => {
                output::heading(&format!("Invalidated {}", report.event_type.to_string().cyan()));
                for pattern in &report.patterns {
                    output::field("Pattern", pattern);
                }
                if !report.tags.is_empty() {
                    let via = if report.warmed { " (via warmer)" } else { "" };
                    output::field("Tags", format!("{}{}", report.tags.join(", "), via));
                }
                output::field("Keys deleted", report.keys_deleted);
                for error in &report.errors {
                    output::warn(error);
                }
                println!();
            }
        }
    }

    match outcome.report() {
        Some(report) if !report.succeeded() => Err(CliError::Command(format!(
            "{} of the invalidation steps failed",
            report.errors.len()
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta() {
        assert_eq!(
            parse_meta("tenantId=t1"),
            Ok(("tenantId".to_string(), "t1".to_string()))
        );
        assert_eq!(
            parse_meta("fields=a=b"),
            Ok(("fields".to_string(), "a=b".to_string()))
        );
        assert!(parse_meta("tenantId").is_err());
        assert!(parse_meta("=t1").is_err());
    }
}
