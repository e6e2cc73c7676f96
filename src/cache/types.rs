//! Core type definitions for the cache system

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type
pub type CacheKey = String;

/// Cached payload; cloning only bumps a reference count
pub type Payload = Bytes;

/// The two cache tiers managed by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierKind {
    /// In-process memory tier
    Local,

    /// Network-shared tier reachable by every instance
    Distributed,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Local => write!(f, "local"),
            TierKind::Distributed => write!(f, "distributed"),
        }
    }
}

/// Coordinator-level statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups served by the local tier
    pub local_hits: u64,

    /// Lookups served by the distributed tier (and back-filled locally)
    pub distributed_hits: u64,

    /// Lookups that missed both tiers
    pub misses: u64,

    /// Number of times a factory was actually invoked
    pub factory_invocations: u64,

    /// Number of factory failures
    pub factory_failures: u64,

    /// Callers that joined an in-flight fetch instead of invoking the factory
    pub coalesced_waits: u64,

    /// Tier operations that failed and were degraded around
    pub tier_failures: u64,

    /// Keys removed through `remove` or `remove_by_tag`
    pub invalidations: u64,
}

impl CacheStats {
    /// Total lookups observed
    pub fn lookups(&self) -> u64 {
        self.local_hits + self.distributed_hits + self.misses
    }

    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.lookups();
        if total == 0 {
            0.0
        } else {
            ((self.local_hits + self.distributed_hits) as f64 / total as f64) * 100.0
        }
    }

    /// Share of hits served locally, as a percentage of all hits
    pub fn local_hit_share(&self) -> f64 {
        let hits = self.local_hits + self.distributed_hits;
        if hits == 0 {
            0.0
        } else {
            (self.local_hits as f64 / hits as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ local_hits: {}, distributed_hits: {}, misses: {}, hit_rate: {:.2}%, factory_invocations: {}, coalesced: {}, tier_failures: {} }}",
            self.local_hits,
            self.distributed_hits,
            self.misses,
            self.hit_rate(),
            self.factory_invocations,
            self.coalesced_waits,
            self.tier_failures
        )
    }
}
