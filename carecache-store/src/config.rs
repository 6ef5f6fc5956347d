//! Cache store configuration.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (redis://host:port or rediss://host:port for TLS).
    pub url: String,

    /// Namespace prepended to every generated key (`saas:user:42`).
    pub key_prefix: String,

    /// TTL applied when `set` is called without one.
    #[serde(with = "secs")]
    pub default_ttl: Duration,

    /// Serialized values larger than this many bytes are gzip-compressed.
    pub compression_threshold: usize,

    /// `COUNT` hint per `SCAN` page in `del_pattern`.
    pub scan_batch_size: usize,

    /// Maximum keys per `DEL` round trip.
    pub delete_batch_size: usize,

    /// Number of response-time samples kept for the rolling average.
    pub stats_window: usize,

    /// Lower bound for the TTL of tag index sets.
    #[serde(with = "secs")]
    pub tag_ttl: Duration,

    /// Connection establishment timeout.
    #[serde(with = "secs")]
    pub connection_timeout: Duration,

    /// Per-command response timeout.
    #[serde(with = "secs")]
    pub response_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "saas".to_string(),
            default_ttl: Duration::from_secs(300),
            compression_threshold: 1024,
            scan_batch_size: 100,
            delete_batch_size: 100,
            stats_window: 1000,
            tag_ttl: Duration::from_secs(24 * 60 * 60),
            connection_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    cache: StoreConfig,
}

impl StoreConfig {
    /// Create a configuration for the given Redis URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::new()
    }

    /// Load configuration from environment variables (and `.env` if present).
    ///
    /// Unparseable numeric values are ignored and the default is kept.
    pub fn from_env() -> StoreConfigBuilder {
        let _ = dotenvy::dotenv();
        let mut builder = StoreConfigBuilder::new();

        if let Ok(url) = std::env::var("CARECACHE_REDIS_URL").or_else(|_| std::env::var("REDIS_URL")) {
            builder = builder.url(url);
        }

        if let Ok(prefix) = std::env::var("CARECACHE_KEY_PREFIX") {
            builder = builder.key_prefix(prefix);
        }

        if let Some(secs) = env_u64("CARECACHE_DEFAULT_TTL") {
            builder = builder.default_ttl(Duration::from_secs(secs));
        }

        if let Some(bytes) = env_u64("CARECACHE_COMPRESSION_THRESHOLD") {
            builder = builder.compression_threshold(bytes as usize);
        }

        if let Some(count) = env_u64("CARECACHE_SCAN_BATCH") {
            builder = builder.scan_batch_size(count as usize);
        }

        if let Some(secs) = env_u64("CARECACHE_TAG_TTL") {
            builder = builder.tag_ttl(Duration::from_secs(secs));
        }

        builder
    }

    /// Parse the `[cache]` table of a TOML document.
    ///
    /// ```
    /// use carecache_store::StoreConfig;
    ///
    /// let config = StoreConfig::from_toml_str(r#"
    ///     [cache]
    ///     url = "redis://cache:6379"
    ///     default_ttl = 60
    /// "#).unwrap();
    /// assert_eq!(config.key_prefix, "saas");
    /// ```
    pub fn from_toml_str(input: &str) -> StoreResult<Self> {
        let file: ConfigFile =
            toml::from_str(input).map_err(|e| StoreError::Config(e.to_string()))?;
        file.cache.validate()?;
        Ok(file.cache)
    }

    /// Reject values that would make batching or statistics meaningless.
    pub fn validate(&self) -> StoreResult<()> {
        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return Err(StoreError::Config(format!(
                "key prefix must be non-empty and colon-free, got {:?}",
                self.key_prefix
            )));
        }
        if self.scan_batch_size == 0 || self.delete_batch_size == 0 {
            return Err(StoreError::Config("batch sizes must be positive".into()));
        }
        if self.stats_window == 0 {
            return Err(StoreError::Config("stats window must be positive".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(StoreError::Config("default TTL must be positive".into()));
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Builder for [`StoreConfig`].
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn compression_threshold(mut self, bytes: usize) -> Self {
        self.config.compression_threshold = bytes;
        self
    }

    pub fn scan_batch_size(mut self, count: usize) -> Self {
        self.config.scan_batch_size = count;
        self
    }

    pub fn delete_batch_size(mut self, count: usize) -> Self {
        self.config.delete_batch_size = count;
        self
    }

    pub fn stats_window(mut self, samples: usize) -> Self {
        self.config.stats_window = samples;
        self
    }

    pub fn tag_ttl(mut self, ttl: Duration) -> Self {
        self.config.tag_ttl = ttl;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Build without validation.
    pub fn build(self) -> StoreConfig {
        self.config
    }

    /// Build and validate.
    pub fn try_build(self) -> StoreResult<StoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.key_prefix, "saas");
        assert_eq!(config.default_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::builder()
            .url("redis://cache:6380")
            .key_prefix("clinic")
            .scan_batch_size(500)
            .stats_window(10)
            .build();

        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.key_prefix, "clinic");
        assert_eq!(config.scan_batch_size, 500);
        assert_eq!(config.stats_window, 10);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(StoreConfig::builder().key_prefix("").try_build().is_err());
        assert!(StoreConfig::builder().key_prefix("a:b").try_build().is_err());
        assert!(StoreConfig::builder().scan_batch_size(0).try_build().is_err());
        assert!(StoreConfig::builder().stats_window(0).try_build().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            [cache]
            url = "redis://cache:6379/2"
            key_prefix = "ehr"
            default_ttl = 120
            tag_ttl = 3600
            "#,
        )
        .unwrap();

        assert_eq!(config.url, "redis://cache:6379/2");
        assert_eq!(config.key_prefix, "ehr");
        assert_eq!(config.default_ttl, Duration::from_secs(120));
        assert_eq!(config.tag_ttl, Duration::from_secs(3600));
        assert_eq!(config.compression_threshold, 1024);
    }

    #[test]
    fn test_from_toml_missing_table() {
        let err = StoreConfig::from_toml_str("[other]\nx = 1").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
