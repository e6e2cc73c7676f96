//! Configuration for the hybrid cache

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the hybrid cache coordinator and its local tier
///
/// Defaults:
/// - Payload cap: 1 MiB, key cap: 256 characters
/// - Distributed expiration: 5 minutes, local expiration: 1 minute
/// - No TTL jitter unless requested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridCacheConfig {
    /// Largest payload accepted by `set` or cached from a factory
    pub maximum_payload_bytes: usize,

    /// Longest key accepted, in bytes
    pub maximum_key_length: usize,

    /// Distributed tier TTL used when a call omits one
    pub default_expiration: Duration,

    /// Local tier TTL used when a call omits one
    /// Must not exceed `default_expiration`
    pub default_local_expiration: Duration,

    /// TTL jitter factor (0.0 - 1.0) applied to distributed expiration
    /// Spreads out expiry of entries written together
    pub ttl_jitter: f64,

    /// Maximum number of entries in the local tier
    pub local_max_entries: usize,

    /// Maximum total size of the local tier in bytes
    pub local_max_size_bytes: usize,

    /// Enable the background sweep of expired local entries
    pub enable_auto_cleanup: bool,

    /// Interval between background sweeps
    pub cleanup_interval: Duration,
}

impl Default for HybridCacheConfig {
    fn default() -> Self {
        Self {
            // 1 MB
            maximum_payload_bytes: 1024 * 1024,
            maximum_key_length: 256,
            // 5 minutes
            default_expiration: Duration::from_secs(300),
            // 1 minute
            default_local_expiration: Duration::from_secs(60),
            ttl_jitter: 0.0,
            local_max_entries: 10_000,
            // 100 MB
            local_max_size_bytes: 100 * 1024 * 1024,
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl HybridCacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> HybridCacheConfigBuilder {
        HybridCacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.maximum_payload_bytes == 0 {
            return Err(CacheError::Config(
                "maximum_payload_bytes must be greater than 0".to_string(),
            ));
        }

        if self.maximum_key_length == 0 {
            return Err(CacheError::Config(
                "maximum_key_length must be greater than 0".to_string(),
            ));
        }

        if self.default_expiration.is_zero() {
            return Err(CacheError::Config(
                "default_expiration must be greater than 0".to_string(),
            ));
        }

        if self.default_local_expiration > self.default_expiration {
            return Err(CacheError::Config(format!(
                "default_local_expiration ({:?}) must not exceed default_expiration ({:?})",
                self.default_local_expiration, self.default_expiration
            )));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.local_max_entries == 0 {
            return Err(CacheError::Config(
                "local_max_entries must be greater than 0".to_string(),
            ));
        }

        if self.local_max_size_bytes == 0 {
            return Err(CacheError::Config(
                "local_max_size_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply the configured jitter to a distributed expiration
    pub fn jittered(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::from_secs_f64(final_secs)
    }

    /// Load configuration from the environment (and a `.env` file if present)
    ///
    /// Recognized variables:
    /// - `HYBRID_CACHE_MAX_PAYLOAD_BYTES`
    /// - `HYBRID_CACHE_MAX_KEY_LENGTH`
    /// - `HYBRID_CACHE_EXPIRATION_SECS`
    /// - `HYBRID_CACHE_LOCAL_EXPIRATION_SECS`
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            maximum_payload_bytes: env_parse("HYBRID_CACHE_MAX_PAYLOAD_BYTES")?
                .unwrap_or(defaults.maximum_payload_bytes),
            maximum_key_length: env_parse("HYBRID_CACHE_MAX_KEY_LENGTH")?
                .unwrap_or(defaults.maximum_key_length),
            default_expiration: env_parse("HYBRID_CACHE_EXPIRATION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_expiration),
            default_local_expiration: env_parse("HYBRID_CACHE_LOCAL_EXPIRATION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_local_expiration),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CacheError::Config(format!("{} has an invalid value: '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct HybridCacheConfigBuilder {
    maximum_payload_bytes: Option<usize>,
    maximum_key_length: Option<usize>,
    default_expiration: Option<Duration>,
    default_local_expiration: Option<Duration>,
    ttl_jitter: Option<f64>,
    local_max_entries: Option<usize>,
    local_max_size_bytes: Option<usize>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
}

impl HybridCacheConfigBuilder {
    /// Set maximum payload size in bytes
    pub fn maximum_payload_bytes(mut self, max: usize) -> Self {
        self.maximum_payload_bytes = Some(max);
        self
    }

    /// Set maximum key length
    pub fn maximum_key_length(mut self, max: usize) -> Self {
        self.maximum_key_length = Some(max);
        self
    }

    /// Set default distributed expiration
    pub fn default_expiration(mut self, ttl: Duration) -> Self {
        self.default_expiration = Some(ttl);
        self
    }

    /// Set default local expiration
    pub fn default_local_expiration(mut self, ttl: Duration) -> Self {
        self.default_local_expiration = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set maximum number of local entries
    pub fn local_max_entries(mut self, max: usize) -> Self {
        self.local_max_entries = Some(max);
        self
    }

    /// Set maximum local tier size in bytes
    pub fn local_max_size_bytes(mut self, size: usize) -> Self {
        self.local_max_size_bytes = Some(size);
        self
    }

    /// Enable or disable the background sweep
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> HybridCacheConfig {
        let defaults = HybridCacheConfig::default();

        HybridCacheConfig {
            maximum_payload_bytes: self
                .maximum_payload_bytes
                .unwrap_or(defaults.maximum_payload_bytes),
            maximum_key_length: self
                .maximum_key_length
                .unwrap_or(defaults.maximum_key_length),
            default_expiration: self
                .default_expiration
                .unwrap_or(defaults.default_expiration),
            default_local_expiration: self
                .default_local_expiration
                .unwrap_or(defaults.default_local_expiration),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            local_max_entries: self.local_max_entries.unwrap_or(defaults.local_max_entries),
            local_max_size_bytes: self
                .local_max_size_bytes
                .unwrap_or(defaults.local_max_size_bytes),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
        }
    }
}

/// Preset configurations for common use cases
impl HybridCacheConfig {
    /// Rapidly changing data: short TTLs, light jitter
    pub fn realtime() -> Self {
        Self {
            default_expiration: Duration::from_secs(30),
            default_local_expiration: Duration::from_secs(5),
            ttl_jitter: 0.10,
            local_max_entries: 5_000,
            local_max_size_bytes: 50 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Memory-constrained processes
    pub fn small() -> Self {
        Self {
            maximum_payload_bytes: 64 * 1024,
            local_max_entries: 1_000,
            local_max_size_bytes: 10 * 1024 * 1024,
            ..Default::default()
        }
    }

    /// Large deployments with long-lived entries
    pub fn large() -> Self {
        Self {
            maximum_payload_bytes: 8 * 1024 * 1024,
            default_expiration: Duration::from_secs(3600),
            default_local_expiration: Duration::from_secs(300),
            ttl_jitter: 0.10,
            local_max_entries: 1_000_000,
            local_max_size_bytes: 2 * 1024 * 1024 * 1024,
            ..Default::default()
        }
    }
}

/// Connection settings for the Redis-backed distributed tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix prepended to every key, isolating applications sharing a server
    pub key_prefix: String,

    /// Maximum pooled connections
    pub pool_size: usize,

    /// Timeout for acquiring, creating and recycling connections
    pub timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: String::new(),
            pool_size: 16,
            timeout: Duration::from_millis(500),
        }
    }
}

impl RedisConfig {
    /// Create a config for the given URL with default pool settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Load from `REDIS_URL` and `REDIS_KEY_PREFIX` (and a `.env` file if present)
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            ..defaults
        }
    }
}
