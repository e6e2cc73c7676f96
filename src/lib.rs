//! # hybrid-cache
//!
//! A two-tier cache for Rust services: a bounded in-process tier in front of
//! a shared distributed tier (Redis, or an in-process stand-in).
//!
//! ## Features
//!
//! - Read-through `get_or_create` with single-flight factory execution
//! - Per-entry expirations for each tier, with optional TTL jitter
//! - Tag-based bulk invalidation across both tiers
//! - Degrades to local-only operation when the distributed tier is down
//! - Health probing of the distributed tier with retries
//!
//! ## Quick Start
//!
//! ```no_run
//! use hybrid_cache::{EntryOptions, HybridCache, HybridCacheConfig, RedisConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = HybridCache::with_redis(
//!         HybridCacheConfig::from_env()?,
//!         &RedisConfig::from_env(),
//!     )?;
//!
//!     let report = cache
//!         .get_or_create(
//!             "report:2024-q1",
//!             || async { Ok::<_, anyhow::Error>(build_report().await) },
//!             EntryOptions::new().tag("reports"),
//!         )
//!         .await?;
//!     println!("report is {} bytes", report.len());
//!
//!     // Drop every cached report on every instance
//!     cache.remove_by_tag("reports").await;
//!     Ok(())
//! }
//!
//! async fn build_report() -> Vec<u8> {
//!     b"...".to_vec()
//! }
//! ```
//!
//! ## Health Checks
//!
//! ```no_run
//! use hybrid_cache::{HybridCache, HybridCacheConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = HybridCache::in_memory(HybridCacheConfig::default())?;
//!
//!     let result = cache.health_check().await;
//!     if result.status.is_operational() {
//!         println!("distributed tier answered in {}ms", result.response_time_ms);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod health;

// Re-export main types for convenience
pub use cache::{
    CacheEntry, CacheKey, CacheStats, DistributedTier, EntryFlags, EntryOptions, HybridCache,
    HybridCacheConfig, HybridCacheConfigBuilder, InMemoryDistributedStore, InvalidationEvent,
    InvalidationReason, LocalTier, MemoryStore, Payload, RedisConfig, RedisStore, TagIndex,
    TierKind, TierOutcome, WriteReport,
};
pub use error::{CacheError, Result};
pub use health::{HealthCheckConfig, HealthCheckResult, HealthStatus};
