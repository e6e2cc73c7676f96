//! Tier contracts
//!
//! The coordinator only ever talks to its tiers through these two traits, so
//! any backend offering get/set/remove with per-entry TTL can be plugged in.

use crate::cache::types::Payload;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Fast in-process tier
///
/// Lookups never fail; an absent or expired entry is simply `None`. Eviction
/// is the backend's own business.
#[async_trait]
pub trait LocalTier: Send + Sync {
    async fn get(&self, key: &str) -> Option<Payload>;

    /// Store a payload; fails only when the entry can never fit
    async fn set(&self, key: &str, payload: Payload, ttl: Duration) -> Result<()>;

    /// Remove a key, returning whether it was present
    async fn remove(&self, key: &str) -> bool;
}

/// Network-shared tier reachable by every instance
///
/// Infrastructure failures surface as `CacheError::TierUnavailable` and must
/// never be reported as a miss.
#[async_trait]
pub trait DistributedTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Payload>>;

    async fn set(&self, key: &str, payload: Payload, ttl: Duration) -> Result<()>;

    /// Remove a key; removing an absent key succeeds
    async fn remove(&self, key: &str) -> Result<()>;

    /// Round-trip to the backend, used by health checks
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
