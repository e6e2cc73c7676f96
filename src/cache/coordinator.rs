//! Hybrid cache coordinator
//!
//! Ties the local tier, the distributed tier and the tag index together:
//! - Lookups go local -> distributed -> factory, back-filling faster tiers
//! - Concurrent misses for one key share a single factory invocation
//! - Writes fan out to both tiers and degrade around tier failures
//! - Tags allow bulk invalidation across both tiers

use crate::cache::{
    config::{HybridCacheConfig, RedisConfig},
    distributed::{InMemoryDistributedStore, RedisStore},
    entry::{CacheEntry, EntryOptions, ResolvedOptions},
    invalidation::{InvalidationEvent, InvalidationReason},
    local::MemoryStore,
    report::{TierOutcome, WriteReport},
    tags::TagIndex,
    tier::{DistributedTier, LocalTier},
    types::{CacheKey, CacheStats, Payload, TierKind},
};
use crate::error::{CacheError, Result};
use crate::health::{self, HealthCheckConfig, HealthCheckResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Keys removed concurrently during a tag invalidation
const REMOVE_CONCURRENCY: usize = 16;

/// Broadcast-once handle on an in-flight factory invocation
type PendingFetch = Shared<BoxFuture<'static, Result<Payload>>>;

#[derive(Debug, Default)]
struct Counters {
    local_hits: AtomicU64,
    distributed_hits: AtomicU64,
    misses: AtomicU64,
    factory_invocations: AtomicU64,
    factory_failures: AtomicU64,
    coalesced_waits: AtomicU64,
    tier_failures: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            factory_invocations: self.factory_invocations.load(Ordering::Relaxed),
            factory_failures: self.factory_failures.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            tier_failures: self.tier_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Two-tier cache coordinator
///
/// Construct once and share: cloning is cheap and every clone talks to the
/// same tiers, tag index and in-flight registry.
///
/// ```rust
/// use hybrid_cache::{EntryOptions, HybridCache, HybridCacheConfig};
///
/// # async fn example() -> hybrid_cache::Result<()> {
/// let cache = HybridCache::in_memory(HybridCacheConfig::default())?;
///
/// let value = cache
///     .get_or_create(
///         "greeting",
///         || async { Ok::<_, std::io::Error>("hello".to_string()) },
///         EntryOptions::new().tag("greetings"),
///     )
///     .await?;
/// assert_eq!(&value[..], b"hello");
///
/// cache.remove_by_tag("greetings").await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HybridCache {
    inner: Arc<Inner>,
    health_config: HealthCheckConfig,
}

struct Inner {
    config: HybridCacheConfig,
    local: Arc<dyn LocalTier>,
    distributed: Arc<dyn DistributedTier>,
    tags: TagIndex,
    pending: DashMap<CacheKey, PendingFetch>,
    counters: Counters,
}

/// Removes the in-flight marker when the fetch task ends, including by panic
struct PendingGuard {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.key);
    }
}

impl HybridCache {
    /// Create a coordinator over caller-provided tiers
    pub fn new(
        config: HybridCacheConfig,
        local: Arc<dyn LocalTier>,
        distributed: Arc<dyn DistributedTier>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            max_payload = config.maximum_payload_bytes,
            max_key = config.maximum_key_length,
            "Initializing hybrid cache"
        );

        let inner = Arc::new(Inner {
            config,
            local,
            distributed,
            tags: TagIndex::new(),
            pending: DashMap::new(),
            counters: Counters::default(),
        });

        if inner.config.enable_auto_cleanup && tokio::runtime::Handle::try_current().is_ok() {
            tokio::spawn(prune_tags_periodically(
                Arc::downgrade(&inner),
                inner.config.cleanup_interval,
            ));
        }

        Ok(Self {
            inner,
            health_config: HealthCheckConfig::default(),
        })
    }

    /// Memory local tier over an in-process distributed stand-in
    pub fn in_memory(config: HybridCacheConfig) -> Result<Self> {
        let local = Self::memory_store(&config);
        Self::new(config, local, Arc::new(InMemoryDistributedStore::new()))
    }

    /// Memory local tier over Redis
    pub fn with_redis(config: HybridCacheConfig, redis: &RedisConfig) -> Result<Self> {
        let distributed = RedisStore::connect(redis)?;
        let local = Self::memory_store(&config);
        Self::new(config, local, Arc::new(distributed))
    }

    /// The sweep task only holds a weak reference and ends with the store
    fn memory_store(config: &HybridCacheConfig) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::from_config(config));
        if config.enable_auto_cleanup && tokio::runtime::Handle::try_current().is_ok() {
            store.spawn_cleanup();
        }
        store
    }

    /// Replace the health check settings
    pub fn with_health_config(mut self, health_config: HealthCheckConfig) -> Self {
        self.health_config = health_config;
        self
    }

    pub fn config(&self) -> &HybridCacheConfig {
        &self.inner.config
    }

    /// The local tier, for diagnostics
    pub fn local(&self) -> &Arc<dyn LocalTier> {
        &self.inner.local
    }

    /// The distributed tier, for diagnostics
    pub fn distributed(&self) -> &Arc<dyn DistributedTier> {
        &self.inner.distributed
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.inner.tags
    }

    /// Number of keys with a factory currently running
    pub fn pending_fetches(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    /// Drop tag memberships of keys whose entries have expired everywhere
    ///
    /// Runs periodically when `enable_auto_cleanup` is set. Returns the
    /// number of keys pruned.
    pub fn prune_expired_tags(&self) -> usize {
        self.inner.tags.prune_expired()
    }

    /// Check the distributed tier
    pub async fn health_check(&self) -> HealthCheckResult {
        health::check_with_retry(self.inner.distributed.as_ref(), &self.health_config).await
    }

    /// Write a payload to both tiers and index its tags
    ///
    /// Oversized keys or payloads are rejected before any tier is touched.
    /// A failure on one tier is reported in the returned `WriteReport`; the
    /// call only fails outright when no tier accepted the write.
    pub async fn set(
        &self,
        key: &str,
        payload: impl Into<Payload>,
        options: EntryOptions,
    ) -> Result<WriteReport> {
        let payload = payload.into();
        self.inner.validate_key(key)?;
        self.inner.validate_payload(key, payload.len())?;

        let resolved = options.resolve(&self.inner.config);
        let entry = CacheEntry::new(key.to_string(), payload, &resolved, options.tags);
        let report = self.inner.write_tiers(&entry, &resolved).await;

        if report.any_applied() {
            self.inner.index_tags(&entry, &report);
            debug!(key = %key, bytes = entry.payload_len(), "cache set");
            return Ok(report);
        }

        match report.warnings().into_iter().next() {
            Some(error) => Err(error.clone()),
            None => Ok(report),
        }
    }

    /// Return the cached payload for `key`, computing it with `factory` on a
    /// full miss
    ///
    /// Only one factory runs per key at a time; concurrent callers share its
    /// result or failure. The factory runs on its own task, so dropping this
    /// future does not cancel it.
    pub async fn get_or_create<F, Fut, T, E>(
        &self,
        key: &str,
        factory: F,
        options: EntryOptions,
    ) -> Result<Payload>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Into<Payload> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.inner.validate_key(key)?;
        let resolved = options.resolve(&self.inner.config);
        let flags = resolved.flags;

        if !flags.disable_local_cache_read {
            if let Some(payload) = self.inner.local.get(key).await {
                Counters::bump(&self.inner.counters.local_hits);
                debug!(key = %key, "cache hit (local)");
                return Ok(payload);
            }
        }

        if !flags.disable_distributed_cache_read {
            match self.inner.distributed.get(key).await {
                Ok(Some(payload)) => {
                    Counters::bump(&self.inner.counters.distributed_hits);
                    debug!(key = %key, "cache hit (distributed)");
                    if !flags.disable_local_cache_write {
                        self.inner
                            .backfill_local(key, payload.clone(), &resolved)
                            .await;
                    }
                    return Ok(payload);
                }
                Ok(None) => {}
                Err(e) => {
                    Counters::bump(&self.inner.counters.tier_failures);
                    warn!(key = %key, error = %e, "distributed read failed, falling back to factory");
                }
            }
        }

        Counters::bump(&self.inner.counters.misses);
        debug!(key = %key, "cache miss");

        self.join_or_start(key, factory, resolved, options.tags).await
    }

    /// Remove `key` from both tiers and from every tag
    ///
    /// Removing an absent key is not an error.
    pub async fn remove(&self, key: &str) -> WriteReport {
        self.inner.tags.remove_key(key);
        let report = self.inner.remove_from_tiers(key).await;
        Counters::bump(&self.inner.counters.invalidations);
        debug!(key = %key, degraded = report.is_degraded(), "cache remove");
        report
    }

    /// Remove every key carrying `tag` from both tiers
    ///
    /// Keys whose removal fails on some tier are listed in the returned
    /// event's `failures`; the remaining keys are still processed.
    pub async fn remove_by_tag(&self, tag: &str) -> InvalidationEvent {
        let mut keys: Vec<CacheKey> = self.inner.tags.remove_tag(tag).into_iter().collect();
        keys.sort();

        let results: Vec<(CacheKey, WriteReport)> = stream::iter(keys.clone())
            .map(|key| {
                let inner = Arc::clone(&self.inner);
                async move {
                    inner.tags.remove_key(&key);
                    let report = inner.remove_from_tiers(&key).await;
                    (key, report)
                }
            })
            .buffer_unordered(REMOVE_CONCURRENCY)
            .collect()
            .await;

        let mut event = InvalidationEvent::new(
            InvalidationReason::TagMatch {
                tag: tag.to_string(),
            },
            keys,
        );

        for (key, report) in results {
            Counters::bump(&self.inner.counters.invalidations);
            for tier in [TierKind::Local, TierKind::Distributed] {
                if let TierOutcome::Failed(error) = report.tier(tier) {
                    event.record_failure(key.clone(), tier, error.clone());
                }
            }
        }

        if event.is_complete() {
            info!(tag = %tag, "Invalidated {} entries by tag", event.keys.len());
        } else {
            warn!(
                tag = %tag,
                failures = event.failures.len(),
                "Invalidated {} entries by tag with tier failures",
                event.keys.len()
            );
        }

        event
    }

    /// Serialize `value` as JSON and `set` it
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: EntryOptions,
    ) -> Result<WriteReport> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, options).await
    }

    /// Typed `get_or_create` storing JSON
    pub async fn get_or_create_json<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: EntryOptions,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let payload = self
            .get_or_create(
                key,
                move || async move {
                    let value = match factory().await {
                        Ok(value) => value,
                        Err(e) => {
                            let error: anyhow::Error = e.into();
                            return Err(error);
                        }
                    };
                    let bytes = serde_json::to_vec(&value)?;
                    Ok::<Vec<u8>, anyhow::Error>(bytes)
                },
                options,
            )
            .await?;

        Ok(serde_json::from_slice(&payload)?)
    }

    fn join_or_start<F, Fut, T, E>(
        &self,
        key: &str,
        factory: F,
        resolved: ResolvedOptions,
        tags: BTreeSet<String>,
    ) -> PendingFetch
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Into<Payload> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        match self.inner.pending.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                Counters::bump(&self.inner.counters.coalesced_waits);
                debug!(key = %key, "joining in-flight fetch");
                return existing.get().clone();
            }
            Entry::Vacant(slot) => {
                let owned_key = key.to_string();
                let fetch = async move {
                    match rx.await {
                        Ok(result) => result,
                        Err(_) => Err(CacheError::factory(
                            owned_key,
                            anyhow::anyhow!("fetch task ended without a result"),
                        )),
                    }
                }
                .boxed()
                .shared();
                slot.insert(fetch.clone());

                let guard = PendingGuard {
                    inner: Arc::clone(&self.inner),
                    key: key.to_string(),
                };
                tokio::spawn(async move {
                    let result = guard
                        .inner
                        .run_fetch(&guard.key, factory, &resolved, tags)
                        .await;
                    drop(guard);
                    let _ = tx.send(result);
                });

                fetch
            }
        }
    }
}

impl Inner {
    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("key must not be empty".to_string()));
        }
        if key.len() > self.config.maximum_key_length {
            return Err(CacheError::InvalidArgument(format!(
                "key length {} exceeds maximum of {}",
                key.len(),
                self.config.maximum_key_length
            )));
        }
        Ok(())
    }

    fn validate_payload(&self, key: &str, len: usize) -> Result<()> {
        if len > self.config.maximum_payload_bytes {
            return Err(CacheError::InvalidArgument(format!(
                "payload for key '{}' is {} bytes, maximum is {}",
                key, len, self.config.maximum_payload_bytes
            )));
        }
        Ok(())
    }

    async fn backfill_local(&self, key: &str, payload: Payload, resolved: &ResolvedOptions) {
        if let Err(e) = self
            .local
            .set(key, payload, resolved.local_expiration)
            .await
        {
            Counters::bump(&self.counters.tier_failures);
            warn!(key = %key, error = %e, "local back-fill failed");
        }
    }

    async fn write_tiers(&self, entry: &CacheEntry, resolved: &ResolvedOptions) -> WriteReport {
        let flags = resolved.flags;

        let local = if flags.disable_local_cache_write {
            TierOutcome::Skipped
        } else {
            match self
                .local
                .set(&entry.key, entry.payload.clone(), entry.local_expiration)
                .await
            {
                Ok(()) => TierOutcome::Applied,
                Err(e) => {
                    Counters::bump(&self.counters.tier_failures);
                    warn!(key = %entry.key, error = %e, "local write failed");
                    TierOutcome::Failed(e)
                }
            }
        };

        let distributed = if flags.disable_distributed_cache_write {
            TierOutcome::Skipped
        } else {
            match self
                .distributed
                .set(&entry.key, entry.payload.clone(), entry.expiration)
                .await
            {
                Ok(()) => TierOutcome::Applied,
                Err(e) => {
                    Counters::bump(&self.counters.tier_failures);
                    warn!(key = %entry.key, error = %e, "distributed write failed");
                    TierOutcome::Failed(e)
                }
            }
        };

        WriteReport::new(local, distributed)
    }

    async fn remove_from_tiers(&self, key: &str) -> WriteReport {
        self.local.remove(key).await;

        let distributed = match self.distributed.remove(key).await {
            Ok(()) => TierOutcome::Applied,
            Err(e) => {
                Counters::bump(&self.counters.tier_failures);
                warn!(key = %key, error = %e, "distributed remove failed");
                TierOutcome::Failed(e)
            }
        };

        WriteReport::new(TierOutcome::Applied, distributed)
    }

    async fn run_fetch<F, Fut, T, E>(
        &self,
        key: &str,
        factory: F,
        resolved: &ResolvedOptions,
        tags: BTreeSet<String>,
    ) -> Result<Payload>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Into<Payload>,
        E: Into<anyhow::Error>,
    {
        // A fetch that finished just before this one was registered may
        // already have filled the local tier
        if !resolved.flags.disable_local_cache_read {
            if let Some(payload) = self.local.get(key).await {
                debug!(key = %key, "local tier filled while registering fetch");
                return Ok(payload);
            }
        }

        Counters::bump(&self.counters.factory_invocations);
        debug!(key = %key, "invoking factory");

        let payload: Payload = match factory().await {
            Ok(value) => value.into(),
            Err(e) => {
                Counters::bump(&self.counters.factory_failures);
                let error = CacheError::factory(key, e);
                warn!(key = %key, error = %error, "factory failed");
                return Err(error);
            }
        };

        if payload.len() > self.config.maximum_payload_bytes {
            warn!(
                key = %key,
                bytes = payload.len(),
                limit = self.config.maximum_payload_bytes,
                "computed payload too large to cache"
            );
            return Ok(payload);
        }

        let entry = CacheEntry::new(key.to_string(), payload.clone(), resolved, tags);
        let write_back = AssertUnwindSafe(async {
            let report = self.write_tiers(&entry, resolved).await;
            if report.any_applied() {
                self.index_tags(&entry, &report);
            } else if report.is_degraded() {
                warn!(key = %key, "computed value could not be cached in any tier");
            }
        });

        // A panicking backend must not turn a computed value into a failure
        if write_back.catch_unwind().await.is_err() {
            Counters::bump(&self.counters.tier_failures);
            warn!(key = %key, "write-back panicked, returning computed value uncached");
        }

        Ok(payload)
    }

    /// Tag membership lasts as long as the longest-lived copy written
    fn index_tags(&self, entry: &CacheEntry, report: &WriteReport) {
        let ttl = if report.distributed.is_applied() {
            entry.expiration
        } else {
            entry.local_expiration
        };
        self.tags.replace_tags(&entry.key, &entry.tags, ttl);
    }
}

async fn prune_tags_periodically(cache: Weak<Inner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let inner = match cache.upgrade() {
            Some(inner) => inner,
            None => {
                debug!("Cache dropped, stopping tag pruning task");
                return;
            }
        };

        let pruned = inner.tags.prune_expired();
        if pruned > 0 {
            debug!("Pruned tags of {} expired keys", pruned);
        }
    }
}
