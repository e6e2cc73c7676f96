//! Cache entries, per-call entry options and local entry metadata

use crate::cache::config::HybridCacheConfig;
use crate::cache::types::{CacheKey, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Longest TTL accepted by any tier (100 years); longer requests are capped
pub const MAX_EXPIRATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Per-call switches controlling which tiers are read and written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFlags {
    pub disable_local_cache_read: bool,
    pub disable_local_cache_write: bool,
    pub disable_distributed_cache_read: bool,
    pub disable_distributed_cache_write: bool,
}

impl EntryFlags {
    /// Skip the local tier entirely
    pub fn disable_local_cache(mut self) -> Self {
        self.disable_local_cache_read = true;
        self.disable_local_cache_write = true;
        self
    }

    /// Skip the distributed tier entirely
    pub fn disable_distributed_cache(mut self) -> Self {
        self.disable_distributed_cache_read = true;
        self.disable_distributed_cache_write = true;
        self
    }
}

/// Options supplied with a single `set` or `get_or_create` call
///
/// Omitted expirations fall back to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    pub expiration: Option<Duration>,
    pub local_expiration: Option<Duration>,
    pub tags: BTreeSet<String>,
    pub flags: EntryFlags,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the distributed tier TTL
    pub fn expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    /// Set the local tier TTL
    pub fn local_expiration(mut self, ttl: Duration) -> Self {
        self.local_expiration = Some(ttl);
        self
    }

    /// Add one tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add several tags
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Replace the flag set
    pub fn flags(mut self, flags: EntryFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Do not read or write the distributed tier for this call
    pub fn disable_distributed_cache(mut self) -> Self {
        self.flags = self.flags.disable_distributed_cache();
        self
    }

    /// Do not read or write the local tier for this call
    pub fn disable_local_cache(mut self) -> Self {
        self.flags = self.flags.disable_local_cache();
        self
    }

    /// Fill in defaults from the configuration
    ///
    /// Both expirations are capped at `MAX_EXPIRATION`, and the local
    /// expiration is clamped to the jittered distributed expiration so it
    /// never outlives it.
    pub fn resolve(&self, config: &HybridCacheConfig) -> ResolvedOptions {
        let requested = self
            .expiration
            .unwrap_or(config.default_expiration)
            .min(MAX_EXPIRATION);
        let expiration = config.jittered(requested).min(MAX_EXPIRATION);
        let local_expiration = self
            .local_expiration
            .unwrap_or(config.default_local_expiration)
            .min(expiration);

        ResolvedOptions {
            expiration,
            local_expiration,
            flags: self.flags,
        }
    }
}

/// Entry options with all defaults applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub expiration: Duration,
    pub local_expiration: Duration,
    pub flags: EntryFlags,
}

/// A value as written through the coordinator
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Payload,
    pub expiration: Duration,
    pub local_expiration: Duration,
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: Payload, options: &ResolvedOptions, tags: BTreeSet<String>) -> Self {
        Self {
            key,
            payload,
            expiration: options.expiration,
            local_expiration: options.local_expiration,
            tags,
        }
    }

    /// Size of the payload in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// A value held by the local tier
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub payload: Payload,
    pub metadata: EntryMetadata,
}

impl StoredEntry {
    pub fn new(key: &str, payload: Payload, ttl: Duration) -> Self {
        let now = Utc::now();
        // TTLs beyond chrono's range never expire
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let size_bytes = key.len() + payload.len() + std::mem::size_of::<EntryMetadata>();

        Self {
            payload,
            metadata: EntryMetadata {
                created_at: now,
                accessed_at: now,
                expires_at,
                access_count: 0,
                size_bytes,
            },
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.metadata.expires_at
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }
}

/// Bookkeeping attached to every local entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub accessed_at: DateTime<Utc>,

    /// When the entry expires
    pub expires_at: DateTime<Utc>,

    /// Number of hits served from this entry
    pub access_count: u64,

    /// Approximate footprint: key + payload + metadata
    pub size_bytes: usize,
}
