//! # Two-tier caching
//!
//! A fast in-process tier in front of a shared distributed tier, coordinated
//! so that every instance of a service sees consistent values.
//!
//! ## Features
//!
//! - **Read-through lookups**: local, then distributed, then the caller's factory
//! - **Stampede protection**: concurrent misses for one key run the factory once
//! - **Back-fill**: distributed hits are copied into the local tier
//! - **Tag invalidation**: remove every entry carrying a tag from both tiers
//! - **Graceful degradation**: a distributed outage falls back to the factory
//!   and local tier instead of failing the caller
//!
//! ## Example
//!
//! ```rust
//! use hybrid_cache::cache::{EntryOptions, HybridCache, HybridCacheConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> hybrid_cache::Result<()> {
//! let config = HybridCacheConfig::builder()
//!     .default_expiration(Duration::from_secs(600))
//!     .default_local_expiration(Duration::from_secs(30))
//!     .build();
//!
//! let cache = HybridCache::in_memory(config)?;
//!
//! cache
//!     .set("user:42", "Ana", EntryOptions::new().tag("users"))
//!     .await?;
//!
//! let name = cache
//!     .get_or_create(
//!         "user:42",
//!         || async { Ok::<_, anyhow::Error>("loaded from db") },
//!         EntryOptions::new(),
//!     )
//!     .await?;
//! assert_eq!(&name[..], b"Ana");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod distributed;
pub mod entry;
pub mod invalidation;
pub mod local;
pub mod report;
pub mod tags;
pub mod tier;
pub mod types;

pub use config::{HybridCacheConfig, HybridCacheConfigBuilder, RedisConfig};
pub use coordinator::HybridCache;
pub use distributed::{InMemoryDistributedStore, RedisStore};
pub use entry::{
    CacheEntry, EntryFlags, EntryMetadata, EntryOptions, ResolvedOptions, StoredEntry,
    MAX_EXPIRATION,
};
pub use invalidation::{InvalidationEvent, InvalidationReason, RemovalFailure};
pub use local::{start_auto_cleanup, LocalStats, MemoryStore};
pub use report::{TierOutcome, WriteReport};
pub use tags::TagIndex;
pub use tier::{DistributedTier, LocalTier};
pub use types::{CacheKey, CacheStats, Payload, TierKind};
