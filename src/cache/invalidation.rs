//! Invalidation events
//!
//! Every bulk removal (tag invalidation, expiry sweeps) is described by an
//! `InvalidationEvent`, which also carries the keys whose removal failed on
//! some tier.

use crate::cache::types::{CacheKey, TierKind};
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Removed explicitly by key
    Manual,

    /// Evicted due to local size or entry-count limits
    SizeLimit,

    /// Removed because it carried an invalidated tag
    TagMatch { tag: String },
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::SizeLimit => write!(f, "cache size limit reached"),
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
        }
    }
}

/// A key whose removal failed on one tier
#[derive(Debug, Clone)]
pub struct RemovalFailure {
    pub key: CacheKey,
    pub tier: TierKind,
    pub error: CacheError,
}

/// Outcome of a bulk invalidation
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<CacheKey>,

    /// Per-key tier failures; the remaining keys were still processed
    pub failures: Vec<RemovalFailure>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<CacheKey>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            failures: Vec::new(),
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    /// Record a failed removal
    pub fn record_failure(&mut self, key: CacheKey, tier: TierKind, error: CacheError) {
        self.failures.push(RemovalFailure { key, tier, error });
    }

    /// True when every key was removed from every tier it was sent to
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
