//! Read-only commands: health, stats, rules, tags.

use super::{Session, Target};
use crate::error::{CliError, CliResult};
use crate::output;
use carecache_invalidation::{InvalidationRule, default_rules};
use carecache_store::{CacheStats, KeyGenerator, TAG_NAMESPACE};
use colored::Colorize;
use serde::Serialize;
use std::time::Instant;

pub async fn health(session: &Session) -> CliResult<()> {
    let started = Instant::now();
    let healthy = session.store.health_check().await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    if session.json {
        output::json(&serde_json::json!({ "healthy": healthy, "latencyMs": elapsed_ms }))?;
    } else if healthy {
        output::success(&format!("cache reachable ({:.1} ms)", elapsed_ms));
    }

    if healthy {
        Ok(())
    } else {
        Err(CliError::Command(format!(
            "cache at {} is not responding",
            session.store.config().url
        )))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsView {
    healthy: bool,
    prefix: String,
    entries: u64,
    tag_sets: u64,
    probe: CacheStats,
}

/// Key counts under the prefix, plus the timings of this probe.
pub async fn stats(session: &Session) -> CliResult<()> {
    let store = &session.store;
    let healthy = store.health_check().await;
    let entries = store
        .try_count_pattern(&format!("{}:*", store.keys().prefix()))
        .await?;
    let tag_sets = store
        .try_count_pattern(&format!("{}:*", TAG_NAMESPACE))
        .await?;

    let view = StatsView {
        healthy,
        prefix: store.keys().prefix().to_string(),
        entries,
        tag_sets,
        probe: store.stats(),
    };

    if session.json {
        return output::json(&view);
    }

    output::heading("Cache statistics");
    output::field("Healthy", if view.healthy { "yes".green() } else { "no".red() });
    output::field("Prefix", &view.prefix);
    output::field("Entries", view.entries);
    output::field("Tag sets", view.tag_sets);
    output::field(
        "Probe response time",
        format!("{:.2} ms", view.probe.avg_response_time_ms),
    );
    println!();
    Ok(())
}

/// The default rule table for `target`'s prefix. Needs no connection.
pub fn rules(target: &Target, json: bool) -> CliResult<()> {
    let config = target.config()?;
    let rules = default_rules(&KeyGenerator::new(config.key_prefix));

    if json {
        return output::json(&rules);
    }

    output::heading(&format!("Invalidation rules ({})", rules.len()));
    for rule in &rules {
        print_rule(rule);
    }
    Ok(())
}

fn print_rule(rule: &InvalidationRule) {
    let warm = if rule.warm_after_invalidation {
        " (warm)".magenta().to_string()
    } else {
        String::new()
    };
    println!("  {}{}", rule.event_type.to_string().bright_white().bold(), warm);
    for pattern in &rule.patterns {
        println!("    {} {}", "pattern".dimmed(), pattern);
    }
    if !rule.tags.is_empty() {
        let tags: Vec<&str> = rule.tags.iter().map(String::as_str).collect();
        println!("    {} {}", "tags".dimmed(), tags.join(", ").cyan());
    }
}

pub async fn tags(session: &Session, tag: &str) -> CliResult<()> {
    let members = session.store.tag_members(tag).await;
    let live = session.store.mget::<serde_json::Value, _>(&members).await;

    if session.json {
        let view: Vec<_> = members
            .iter()
            .zip(&live)
            .map(|(key, value)| serde_json::json!({ "key": key, "live": value.is_some() }))
            .collect();
        return output::json(&view);
    }

    output::heading(&format!("Tag {} ({} members)", tag.cyan(), members.len()));
    if members.is_empty() {
        output::info("the tag set is empty or has expired");
    }
    for (key, value) in members.iter().zip(&live) {
        let marker = if value.is_some() {
            "●".green()
        } else {
            "○".dimmed()
        };
        println!("  {} {}", marker, key);
    }
    println!();
    Ok(())
}
