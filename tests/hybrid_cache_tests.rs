//! Integration tests for the hybrid cache coordinator
//!
//! These tests verify the coordinator end to end:
//! - Read-through lookups and back-fill
//! - Single-flight factory execution
//! - Tag invalidation
//! - Degraded operation while the distributed tier is down

use hybrid_cache::cache::{
    DistributedTier, EntryOptions, HybridCache, HybridCacheConfig, InMemoryDistributedStore,
    InvalidationReason, LocalTier, MemoryStore, Payload, TierKind, TierOutcome,
};
use hybrid_cache::CacheError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    cache: HybridCache,
    local: Arc<MemoryStore>,
    distributed: Arc<InMemoryDistributedStore>,
}

fn harness() -> Harness {
    let config = HybridCacheConfig::builder()
        .default_expiration(Duration::from_secs(60))
        .default_local_expiration(Duration::from_secs(30))
        .maximum_key_length(64)
        .enable_auto_cleanup(false)
        .build();

    let local = Arc::new(MemoryStore::from_config(&config));
    let distributed = Arc::new(InMemoryDistributedStore::new());
    let cache = HybridCache::new(config, local.clone(), distributed.clone()).unwrap();

    Harness {
        cache,
        local,
        distributed,
    }
}

fn counting_factory(
    calls: Arc<AtomicUsize>,
    value: &'static str,
    delay: Duration,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, anyhow::Result<&'static str>> + Send + 'static
{
    move || {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok(value)
        })
    }
}

// ============================================================================
// Basic operations
// ============================================================================

#[tokio::test]
async fn test_set_then_get_or_create_returns_stored_value() {
    let h = harness();

    h.cache
        .set("user:1", "Ana", EntryOptions::new())
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let value = h
        .cache
        .get_or_create(
            "user:1",
            counting_factory(calls.clone(), "from factory", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(&value[..], b"Ana");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_set_writes_both_tiers() {
    let h = harness();

    let report = h
        .cache
        .set("k", "v", EntryOptions::new())
        .await
        .unwrap();

    assert!(report.local.is_applied());
    assert!(report.distributed.is_applied());
    assert_eq!(h.local.get("k").await, Some(Payload::from_static(b"v")));
    assert_eq!(
        h.distributed.get("k").await.unwrap(),
        Some(Payload::from_static(b"v"))
    );
}

#[tokio::test]
async fn test_miss_invokes_factory_and_caches_result() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = h
        .cache
        .get_or_create(
            "k",
            counting_factory(calls.clone(), "computed", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();
    let second = h
        .cache
        .get_or_create(
            "k",
            counting_factory(calls.clone(), "recomputed", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(&first[..], b"computed");
    assert_eq!(&second[..], b"computed");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.distributed.get("k").await.unwrap().is_some());

    let stats = h.cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.local_hits, 1);
    assert_eq!(stats.factory_invocations, 1);
}

#[tokio::test]
async fn test_distributed_hit_backfills_local() {
    let h = harness();
    h.distributed
        .set("k", Payload::from_static(b"shared"), Duration::from_secs(60))
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let value = h
        .cache
        .get_or_create(
            "k",
            counting_factory(calls.clone(), "unused", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(&value[..], b"shared");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.local.get("k").await, Some(Payload::from_static(b"shared")));
    assert_eq!(h.cache.stats().distributed_hits, 1);
}

#[tokio::test]
async fn test_local_expiry_falls_back_to_distributed() {
    let h = harness();

    h.cache
        .set(
            "k",
            "v",
            EntryOptions::new()
                .expiration(Duration::from_secs(10))
                .local_expiration(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.local.get("k").await.is_none());

    let calls = Arc::new(AtomicUsize::new(0));
    let value = h
        .cache
        .get_or_create(
            "k",
            counting_factory(calls.clone(), "unused", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(&value[..], b"v");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.cache.stats().distributed_hits, 1);
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let h = harness();
    h.cache
        .set("k", "v", EntryOptions::new().tag("t"))
        .await
        .unwrap();

    let first = h.cache.remove("k").await;
    let second = h.cache.remove("k").await;
    let never_set = h.cache.remove("missing").await;

    assert!(!first.is_degraded());
    assert!(!second.is_degraded());
    assert!(!never_set.is_degraded());
    assert!(h.local.get("k").await.is_none());
    assert!(h.distributed.get("k").await.unwrap().is_none());
    assert!(h.cache.tag_index().tags_for_key("k").is_empty());
}

// ============================================================================
// Validation and flags
// ============================================================================

#[tokio::test]
async fn test_key_over_limit_touches_no_tier() {
    let h = harness();
    let long_key = "k".repeat(65);

    let err = h
        .cache
        .set(&long_key, "v", EntryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidArgument(_)));

    let calls = Arc::new(AtomicUsize::new(0));
    let err = h
        .cache
        .get_or_create(
            &long_key,
            counting_factory(calls.clone(), "v", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(h.local.is_empty().await);
    assert_eq!(h.distributed.operation_counts(), (0, 0, 0));
}

#[tokio::test]
async fn test_key_at_limit_is_accepted() {
    let h = harness();
    let key = "k".repeat(64);

    assert!(h.cache.set(&key, "v", EntryOptions::new()).await.is_ok());
}

#[tokio::test]
async fn test_disable_distributed_cache_skips_distributed_tier() {
    let h = harness();

    let report = h
        .cache
        .set("k", "v", EntryOptions::new().disable_distributed_cache())
        .await
        .unwrap();

    assert!(report.local.is_applied());
    assert!(matches!(report.distributed, TierOutcome::Skipped));
    assert!(h.local.get("k").await.is_some());
    assert_eq!(h.distributed.operation_counts(), (0, 0, 0));
}

#[tokio::test]
async fn test_disable_local_cache_skips_local_tier() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));

    h.cache
        .get_or_create(
            "k",
            counting_factory(calls.clone(), "v", Duration::ZERO),
            EntryOptions::new().disable_local_cache(),
        )
        .await
        .unwrap();

    assert!(h.local.is_empty().await);
    assert!(h.distributed.get("k").await.unwrap().is_some());
}

// ============================================================================
// Single-flight
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_invoke_factory_once() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = h.cache.clone();
        let factory = counting_factory(calls.clone(), "expensive", Duration::from_millis(100));
        handles.push(tokio::spawn(async move {
            cache.get_or_create("hot", factory, EntryOptions::new()).await
        }));
    }

    for handle in handles {
        let value = handle.await.unwrap().unwrap();
        assert_eq!(&value[..], b"expensive");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.cache.pending_fetches(), 0);

    let stats = h.cache.stats();
    assert_eq!(stats.factory_invocations, 1);
    assert_eq!(stats.coalesced_waits, 19);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_factory_failure_reaches_every_waiter() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = h.cache.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_create(
                    "flaky",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<&str, _>(anyhow::anyhow!("database unavailable"))
                    },
                    EntryOptions::new(),
                )
                .await
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        match &err {
            CacheError::FactoryFailure { key, .. } => assert_eq!(key, "flaky"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err
            .factory_error()
            .unwrap()
            .to_string()
            .contains("database unavailable"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.local.get("flaky").await.is_none());
    assert!(h.distributed.get("flaky").await.unwrap().is_none());

    // Failures are not cached; the next caller runs the factory again
    let value = h
        .cache
        .get_or_create(
            "flaky",
            counting_factory(calls.clone(), "recovered", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(&value[..], b"recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_factory() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        h.cache.get_or_create(
            "slow",
            counting_factory(calls.clone(), "finished", Duration::from_millis(100)),
            EntryOptions::new(),
        ),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.local.get("slow").await, Some(Payload::from_static(b"finished")));
    assert_eq!(h.cache.pending_fetches(), 0);

    let value = h
        .cache
        .get_or_create(
            "slow",
            counting_factory(calls.clone(), "again", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(&value[..], b"finished");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Tags
// ============================================================================

#[tokio::test]
async fn test_remove_by_tag_clears_both_tiers() {
    let h = harness();

    h.cache
        .set("a", "1", EntryOptions::new().tag("x"))
        .await
        .unwrap();
    h.cache
        .set("b", "2", EntryOptions::new().tags(["x", "y"]))
        .await
        .unwrap();
    h.cache
        .set("c", "3", EntryOptions::new().tag("y"))
        .await
        .unwrap();

    let event = h.cache.remove_by_tag("x").await;

    assert_eq!(event.keys, vec!["a".to_string(), "b".to_string()]);
    assert!(event.is_complete());
    assert!(matches!(event.reason, InvalidationReason::TagMatch { ref tag } if tag == "x"));

    for key in ["a", "b"] {
        assert!(h.local.get(key).await.is_none());
        assert!(h.distributed.get(key).await.unwrap().is_none());
    }
    assert!(h.local.get("c").await.is_some());

    let index = h.cache.tag_index();
    assert!(index.keys_for_tag("x").is_empty());
    let remaining = index.keys_for_tag("y");
    assert_eq!(remaining.len(), 1);
    assert!(remaining.contains("c"));
}

#[tokio::test]
async fn test_remove_by_unknown_tag_is_empty() {
    let h = harness();

    let event = h.cache.remove_by_tag("nothing").await;

    assert!(event.keys.is_empty());
    assert!(event.is_complete());
}

#[tokio::test]
async fn test_rewrite_replaces_tag_set() {
    let h = harness();

    h.cache
        .set("k", "v1", EntryOptions::new().tags(["old", "shared"]))
        .await
        .unwrap();
    h.cache
        .set("k", "v2", EntryOptions::new().tags(["new", "shared"]))
        .await
        .unwrap();

    let event = h.cache.remove_by_tag("old").await;
    assert!(event.keys.is_empty());
    assert!(h.local.get("k").await.is_some());

    let event = h.cache.remove_by_tag("new").await;
    assert_eq!(event.keys, vec!["k".to_string()]);
    assert!(h.local.get("k").await.is_none());
}

#[tokio::test]
async fn test_background_pruning_forgets_expired_keys() {
    let config = HybridCacheConfig::builder()
        .cleanup_interval(Duration::from_millis(20))
        .build();
    let cache = HybridCache::in_memory(config).unwrap();

    for i in 0..100 {
        cache
            .get_or_create(
                &format!("item:{}", i),
                || async { Ok::<_, anyhow::Error>("v") },
                EntryOptions::new()
                    .expiration(Duration::from_millis(20))
                    .tag("tag2"),
            )
            .await
            .unwrap();
    }
    assert_eq!(cache.tag_index().key_count(), 100);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(cache.tag_index().key_count(), 0);
    assert_eq!(cache.tag_index().tag_count(), 0);
}

#[tokio::test]
async fn test_jittered_expiration_keeps_local_within_distributed() {
    let config = HybridCacheConfig::builder()
        .ttl_jitter(0.5)
        .enable_auto_cleanup(false)
        .build();
    let local = Arc::new(MemoryStore::from_config(&config));
    let distributed = Arc::new(InMemoryDistributedStore::new());
    let cache = HybridCache::new(config, local.clone(), distributed.clone()).unwrap();

    for i in 0..50 {
        cache
            .set(
                &format!("k{}", i),
                "v",
                EntryOptions::new()
                    .expiration(Duration::from_millis(200))
                    .local_expiration(Duration::from_millis(200)),
            )
            .await
            .unwrap();
    }

    // Whatever the distributed tier dropped, the local tier dropped too
    tokio::time::sleep(Duration::from_millis(150)).await;
    for i in 0..50 {
        let key = format!("k{}", i);
        if distributed.get(&key).await.unwrap().is_none() {
            assert!(local.get(&key).await.is_none(), "{} outlived its distributed copy", key);
        }
    }
}

#[tokio::test]
async fn test_factory_result_is_tagged() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));

    h.cache
        .get_or_create(
            "report",
            counting_factory(calls.clone(), "data", Duration::ZERO),
            EntryOptions::new().tag("reports"),
        )
        .await
        .unwrap();

    assert!(h.cache.tag_index().keys_for_tag("reports").contains("report"));
}

// ============================================================================
// Degraded operation
// ============================================================================

#[tokio::test]
async fn test_distributed_outage_degrades_to_factory_and_local() {
    let h = harness();
    h.distributed.set_available(false);
    let calls = Arc::new(AtomicUsize::new(0));

    let value = h
        .cache
        .get_or_create(
            "k",
            counting_factory(calls.clone(), "computed", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(&value[..], b"computed");
    assert_eq!(h.local.get("k").await, Some(Payload::from_static(b"computed")));
    assert!(h.cache.stats().tier_failures >= 2);

    // Served from the local tier while the outage lasts
    let again = h
        .cache
        .get_or_create(
            "k",
            counting_factory(calls.clone(), "other", Duration::ZERO),
            EntryOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(&again[..], b"computed");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_set_during_outage_reports_degraded() {
    let h = harness();
    h.distributed.set_available(false);

    let report = h
        .cache
        .set("k", "v", EntryOptions::new().tag("t"))
        .await
        .unwrap();

    assert!(report.is_degraded());
    assert!(report.local.is_applied());
    assert!(report
        .tier(TierKind::Distributed)
        .error()
        .unwrap()
        .is_tier_unavailable());
    assert!(h.cache.tag_index().keys_for_tag("t").contains("k"));
}

#[tokio::test]
async fn test_remove_by_tag_during_outage_records_failures() {
    let h = harness();
    h.cache
        .set("a", "1", EntryOptions::new().tag("x"))
        .await
        .unwrap();
    h.cache
        .set("b", "2", EntryOptions::new().tag("x"))
        .await
        .unwrap();

    h.distributed.set_available(false);
    let event = h.cache.remove_by_tag("x").await;

    assert!(!event.is_complete());
    assert_eq!(event.failures.len(), 2);
    assert!(event
        .failures
        .iter()
        .all(|f| f.tier == TierKind::Distributed && f.error.is_tier_unavailable()));

    // The local tier is cleared regardless
    assert!(h.local.get("a").await.is_none());
    assert!(h.local.get("b").await.is_none());
}

#[tokio::test]
async fn test_health_check_follows_distributed_availability() {
    let h = harness();
    let cache = h
        .cache
        .clone()
        .with_health_config(hybrid_cache::HealthCheckConfig::no_retry());

    assert!(cache.health_check().await.status.is_operational());

    h.distributed.set_available(false);
    let result = cache.health_check().await;
    assert!(!result.status.is_operational());
    assert!(result.error.is_some());
}
