//! In-process distributed tier stand-in

use crate::cache::{
    tier::DistributedTier,
    types::{CacheKey, Payload, TierKind},
};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Deadline of an entry; `None` never expires
type Deadline = Option<Instant>;

fn is_live(deadline: &Deadline, now: Instant) -> bool {
    deadline.map_or(true, |at| at > now)
}

/// Distributed tier kept in process memory
///
/// Behaves like a remote store (per-entry TTL, optional artificial latency,
/// switchable outage) without any network. Useful for single-instance
/// deployments and for exercising degraded paths.
#[derive(Debug, Default)]
pub struct InMemoryDistributedStore {
    entries: DashMap<CacheKey, (Payload, Deadline)>,
    unavailable: AtomicBool,
    latency: Option<Duration>,
    gets: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
}

impl InMemoryDistributedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    /// Simulate the backend going down (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| is_live(&e.value().1, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operation counters: (gets, sets, removes)
    pub fn operation_counts(&self) -> (u64, u64, u64) {
        (
            self.gets.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
            self.removes.load(Ordering::Relaxed),
        )
    }

    async fn round_trip(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable(
                TierKind::Distributed,
                "simulated outage",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedTier for InMemoryDistributedStore {
    async fn get(&self, key: &str) -> Result<Option<Payload>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;

        let expired = match self.entries.get(key) {
            Some(entry) if is_live(&entry.1, Instant::now()) => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!(key = %key, "Distributed entry expired");
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, payload: Payload, ttl: Duration) -> Result<()> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;

        self.entries
            .insert(key.to_string(), (payload, Instant::now().checked_add(ttl)));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.removes.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await?;

        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.round_trip().await
    }
}
