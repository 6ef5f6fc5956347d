//! Destructive maintenance: prune, del-pattern, clear.

use super::Session;
use crate::error::{CliError, CliResult};
use crate::output;

pub async fn prune(session: &Session, tag: &str) -> CliResult<()> {
    let removed = session.store.try_prune_tag(tag).await?;
    if session.json {
        return output::json(&serde_json::json!({ "tag": tag, "removed": removed }));
    }
    output::success(&format!("removed {} dangling members from {}", removed, tag));
    Ok(())
}

pub async fn del_pattern(session: &Session, pattern: &str) -> CliResult<()> {
    if pattern.trim_matches('*').is_empty() {
        return Err(CliError::InvalidArgument(
            "refusing to delete every key; use `clear --yes`".to_string(),
        ));
    }
    let deleted = session.store.try_del_pattern(pattern).await?;
    if session.json {
        return output::json(&serde_json::json!({ "pattern": pattern, "deleted": deleted }));
    }
    output::success(&format!("deleted {} keys matching {}", deleted, pattern));
    Ok(())
}

pub async fn clear(session: &Session) -> CliResult<()> {
    if !session.dispatcher.clear_all_caches().await {
        return Err(CliError::Command("flush failed".to_string()));
    }
    if session.json {
        return output::json(&serde_json::json!({ "cleared": true }));
    }
    output::success("cache database flushed");
    Ok(())
}
