//! Local tier: in-process store with TTL expiry and LRU eviction

use crate::cache::{
    config::HybridCacheConfig,
    entry::StoredEntry,
    invalidation::{InvalidationEvent, InvalidationReason},
    tier::LocalTier,
    types::{CacheKey, Payload},
};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Statistics for the local tier
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LocalStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub size_bytes: usize,
    /// Evictions due to entry-count or size limits
    pub evictions_size: u64,
    /// Entries dropped because their TTL elapsed
    pub evictions_ttl: u64,
    /// Explicit removals
    pub removals: u64,
}

/// In-memory local tier bounded by entry count and total size
///
/// - Thread-safe async access via RwLock
/// - Expired entries are dropped on access and by `cleanup_expired`
/// - Least recently used entries are evicted first when a limit is hit
pub struct MemoryStore {
    max_entries: usize,
    max_size_bytes: usize,
    cleanup_interval: Duration,
    store: Arc<RwLock<Store>>,
}

struct Store {
    entries: HashMap<CacheKey, Slot>,

    /// Recency order: access tick -> key, oldest first
    recency: BTreeMap<u64, CacheKey>,

    next_tick: u64,
    current_size_bytes: usize,
    stats: LocalStats,
}

struct Slot {
    entry: StoredEntry,
    tick: u64,
}

impl Store {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove_entry(&mut self, key: &str) -> Option<StoredEntry> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(slot.entry.metadata.size_bytes);
        Some(slot.entry)
    }

    fn pop_lru(&mut self) -> Option<CacheKey> {
        let (_, key) = self.recency.pop_first()?;
        if let Some(slot) = self.entries.remove(&key) {
            self.current_size_bytes = self
                .current_size_bytes
                .saturating_sub(slot.entry.metadata.size_bytes);
        }
        Some(key)
    }
}

impl MemoryStore {
    /// Create a store with explicit limits
    pub fn new(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_size_bytes,
            cleanup_interval: Duration::from_secs(300),
            store: Arc::new(RwLock::new(Store {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
                current_size_bytes: 0,
                stats: LocalStats::default(),
            })),
        }
    }

    /// Create a store sized by the hybrid cache configuration
    pub fn from_config(config: &HybridCacheConfig) -> Self {
        let mut store = Self::new(config.local_max_entries, config.local_max_size_bytes);
        store.cleanup_interval = config.cleanup_interval;
        store
    }

    /// Check if a key is held and not expired (without updating recency)
    pub async fn contains_key(&self, key: &str) -> bool {
        let store = self.store.read().await;
        store
            .entries
            .get(key)
            .map(|slot| !slot.entry.is_expired())
            .unwrap_or(false)
    }

    /// Clear all entries
    pub async fn clear(&self) {
        let mut store = self.store.write().await;

        let count = store.entries.len();
        store.entries.clear();
        store.recency.clear();
        store.current_size_bytes = 0;
        store.stats.removals += count as u64;

        info!("Cleared {} entries from local tier", count);
    }

    /// Remove all expired entries
    pub async fn cleanup_expired(&self) -> Option<InvalidationEvent> {
        let mut store = self.store.write().await;

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        if expired_keys.is_empty() {
            return None;
        }

        for key in &expired_keys {
            store.remove_entry(key);
        }
        store.stats.evictions_ttl += expired_keys.len() as u64;

        debug!("Cleaned up {} expired local entries", expired_keys.len());
        let context = format!("Cleaned up {} expired entries", expired_keys.len());
        Some(InvalidationEvent::new(InvalidationReason::Expired, expired_keys).with_context(context))
    }

    /// Get local tier statistics
    pub async fn stats(&self) -> LocalStats {
        let store = self.store.read().await;
        let mut stats = store.stats.clone();
        stats.entries = store.entries.len();
        stats.size_bytes = store.current_size_bytes;
        stats
    }

    /// Get number of entries (including not-yet-swept expired ones)
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Get current size in bytes
    pub async fn size_bytes(&self) -> usize {
        self.store.read().await.current_size_bytes
    }

    /// Spawn the periodic expiry sweep
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(start_auto_cleanup(Arc::downgrade(self)))
    }

    fn evict_if_needed(&self, store: &mut Store, key: &str, needed_size: usize) -> Result<()> {
        if needed_size > self.max_size_bytes {
            warn!(
                key = %key,
                needed = needed_size,
                limit = self.max_size_bytes,
                "Entry larger than local tier capacity"
            );
            return Err(CacheError::CapacityExceeded {
                needed: needed_size,
                limit: self.max_size_bytes,
            });
        }

        while store.entries.len() >= self.max_entries
            || store.current_size_bytes + needed_size > self.max_size_bytes
        {
            match store.pop_lru() {
                Some(evicted) => {
                    debug!(key = %evicted, "Evicting least recently used local entry");
                    store.stats.evictions_size += 1;
                }
                None => break,
            }
        }

        Ok(())
    }
}

#[async_trait]
impl LocalTier for MemoryStore {
    async fn get(&self, key: &str) -> Option<Payload> {
        let mut store = self.store.write().await;

        let expired = match store.entries.get(key) {
            Some(slot) => slot.entry.is_expired(),
            None => {
                store.stats.misses += 1;
                return None;
            }
        };

        if expired {
            debug!(key = %key, "Local entry expired");
            store.remove_entry(key);
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            return None;
        }

        store.touch(key);
        store.stats.hits += 1;
        let slot = store.entries.get_mut(key)?;
        slot.entry.mark_accessed();
        Some(slot.entry.payload.clone())
    }

    async fn set(&self, key: &str, payload: Payload, ttl: Duration) -> Result<()> {
        let entry = StoredEntry::new(key, payload, ttl);
        let size = entry.metadata.size_bytes;

        let mut store = self.store.write().await;

        // An overwrite frees its old slot before eviction is considered
        if store.remove_entry(key).is_some() {
            debug!(key = %key, "Replacing local entry");
        }

        self.evict_if_needed(&mut store, key, size)?;

        let tick = store.next_tick;
        store.next_tick += 1;
        store.entries.insert(key.to_string(), Slot { entry, tick });
        store.recency.insert(tick, key.to_string());
        store.current_size_bytes += size;

        Ok(())
    }

    async fn remove(&self, key: &str) -> bool {
        let mut store = self.store.write().await;
        let removed = store.remove_entry(key).is_some();
        if removed {
            store.stats.removals += 1;
            debug!(key = %key, "Removed local entry");
        }
        removed
    }
}

/// Background task for periodic expiry sweeps
///
/// Holds only a weak reference and stops once the store is dropped.
pub async fn start_auto_cleanup(cache: Weak<MemoryStore>) {
    let interval = match cache.upgrade() {
        Some(store) => store.cleanup_interval,
        None => return,
    };

    info!("Starting local tier cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let store = match cache.upgrade() {
            Some(store) => store,
            None => {
                debug!("Local tier dropped, stopping cleanup task");
                return;
            }
        };

        if let Some(event) = store.cleanup_expired().await {
            debug!("Auto cleanup removed {} entries", event.keys.len());
        }
    }
}
