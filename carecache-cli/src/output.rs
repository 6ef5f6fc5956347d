//! Terminal output helpers.

use crate::error::CliResult;
use colored::Colorize;
use serde::Serialize;

pub fn success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn warn(msg: &str) {
    println!("  {} {}", "⚠".yellow().bold(), msg.yellow());
}

pub fn info(msg: &str) {
    println!("  {} {}", "→".cyan(), msg);
}

/// Aligned `label: value` line.
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<24} {}", format!("{}:", label).bright_white().bold(), value);
}

pub fn heading(title: &str) {
    println!();
    println!("  {}", title.bright_cyan().bold());
    println!();
}

pub fn json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
