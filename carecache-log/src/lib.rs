//! Logging for the carecache crates.
//!
//! Cache and invalidation failures are swallowed by design (the cache is
//! never the system of record), so the log stream is the only place they
//! surface. This crate keeps that stream cheap when quiet and structured
//! when loud.
//!
//! # Usage
//!
//! ```rust
//! use carecache_log::{debug, info, warn, error};
//!
//! debug!("no invalidation rule for {}", "report.viewed");
//! info!("cache store connected");
//! warn!(target: "carecache::store", "delPattern failed: {}", "timeout");
//! error!("dispatch failed");
//! ```
//!
//! # Environment Variables
//!
//! - `CARECACHE_DEBUG=1` - Enable debug logging
//! - `CARECACHE_LOG_LEVEL=trace|debug|info|warn|error|off` - Minimum level
//! - `CARECACHE_LOG_FORMAT=pretty|compact|json` - Output format (default `json`)
//! - `CARECACHE_LOG_TIMESTAMPS=0` - Drop timestamps from pretty/compact output
//! - `CARECACHE_SERVICE=name` - Service name stamped on JSON lines

use once_cell::sync::Lazy;
use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    /// Nothing is emitted.
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human readable, one field per column.
    Pretty,
    /// Single letter level, short time.
    Compact,
    /// One JSON object per line.
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration, resolved once from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub debug: bool,
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
    /// Value of the `service` field on JSON lines.
    pub service: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            timestamps: true,
            service: "carecache".to_string(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl LogConfig {
    /// Read the `CARECACHE_*` variables and publish level/debug to the
    /// global atomics the macros check.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let debug = env_flag("CARECACHE_DEBUG").unwrap_or(false);

        let level = env::var("CARECACHE_LOG_LEVEL")
            .ok()
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { defaults.level });

        let format = env::var("CARECACHE_LOG_FORMAT")
            .ok()
            .and_then(|s| Format::parse(&s))
            .unwrap_or(defaults.format);

        let config = Self {
            debug,
            level,
            format,
            timestamps: env_flag("CARECACHE_LOG_TIMESTAMPS").unwrap_or(true),
            service: env::var("CARECACHE_SERVICE").unwrap_or(defaults.service),
        };

        DEBUG_ENABLED.store(config.debug, Ordering::SeqCst);
        LOG_LEVEL.store(config.level as u8, Ordering::SeqCst);
        config
    }
}

/// Force configuration loading. Optional; the first log call does it too.
pub fn init() {
    Lazy::force(&CONFIG);
}

#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Whether a macro call at `level` should format and write its line.
#[doc(hidden)]
#[inline]
pub fn should_emit(level: Level) -> bool {
    is_level_enabled(level) || (level == Level::Debug && is_debug_enabled())
}

pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Change the minimum level at runtime.
pub fn set_level(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Toggle debug mode at runtime; enabling it lowers the level to `Debug`.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Emit one line. Used by the macros; call them instead.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    if !should_emit(level) {
        return;
    }
    let config = config();

    match config.format {
        Format::Pretty => write_pretty(level, target, message, config),
        Format::Compact => write_compact(level, target, message, config),
        Format::Json => write_json(level, target, message, config),
    }
}

fn write_pretty(level: Level, target: &str, message: &str, config: &LogConfig) {
    let mut stderr = std::io::stderr().lock();
    if config.timestamps {
        let _ = write!(
            stderr,
            "{} ",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
        );
    }
    let _ = writeln!(stderr, "{:5} [{}] {}", level.as_str(), target, message);
}

fn write_compact(level: Level, target: &str, message: &str, config: &LogConfig) {
    let mut stderr = std::io::stderr().lock();
    if config.timestamps {
        let _ = write!(stderr, "{} ", chrono::Local::now().format("%H:%M:%S"));
    }
    let initial = level.as_str().chars().next().unwrap_or('?');
    let _ = writeln!(stderr, "{} {}: {}", initial, target, message);
}

#[cfg(feature = "json")]
fn write_json(level: Level, target: &str, message: &str, config: &LogConfig) {
    #[derive(serde::Serialize)]
    struct Line<'a> {
        timestamp: String,
        level: &'a str,
        service: &'a str,
        target: &'a str,
        message: &'a str,
    }

    let line = Line {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: level.as_str(),
        service: &config.service,
        target,
        message,
    };

    if let Ok(json) = serde_json::to_string(&line) {
        eprintln!("{}", json);
    }
}

#[cfg(not(feature = "json"))]
fn write_json(level: Level, target: &str, message: &str, config: &LogConfig) {
    // Without serde, fall back to the compact layout.
    write_compact(level, target, message, config);
}

/// Level-checked emit shared by the level macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __emit {
    ($level:expr, target: $target:expr, $($arg:tt)+) => {
        if $crate::should_emit($level) {
            $crate::log($level, $target, &format!($($arg)+));
        }
    };
    ($level:expr, $($arg:tt)+) => {
        $crate::__emit!($level, target: module_path!(), $($arg)+)
    };
}

/// Log at trace level.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Trace, $($arg)+) };
}

/// Log at debug level. Enabled by `CARECACHE_DEBUG=1` or a debug level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Debug, $($arg)+) };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Info, $($arg)+) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Warn, $($arg)+) };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Error, $($arg)+) };
}

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! A `tracing` subscriber that honours the `CARECACHE_*` level.

    use super::config;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    pub fn subscriber() -> impl tracing::Subscriber {
        let directive = config().level.as_str().to_ascii_lowercase();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse(" WARN "), Some(Level::Warn));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_level_ordering_and_u8() {
        assert!(Level::Trace < Level::Error);
        for level in [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error, Level::Off] {
            assert_eq!(Level::from_u8(level as u8), level);
        }
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("Compact"), Some(Format::Compact));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_runtime_level_changes() {
        init();
        let original = current_level();
        let original_debug = is_debug_enabled();

        set_level(Level::Error);
        assert!(!is_level_enabled(Level::Warn));
        assert!(is_level_enabled(Level::Error));
        assert!(!is_level_enabled(Level::Off));

        set_debug(true);
        assert_eq!(current_level(), Level::Debug);

        set_debug(original_debug);
        set_level(original);
    }

    #[test]
    fn test_macros_expand() {
        trace!("trace {}", 1);
        debug!(target: "carecache::test", "debug {}", 2);
        info!("info");
        warn!("warn");
        error!(target: "carecache::test", "error");
    }
}
