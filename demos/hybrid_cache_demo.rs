//! Hybrid Cache Demo Application
//!
//! Walks through set, get-or-create, local inspection, remove and
//! remove-by-tag against a two-tier cache.
//!
//! Usage:
//!   cargo run --example hybrid_cache_demo
//!
//! Environment variables:
//!   REDIS_URL        - Use Redis as the distributed tier (default: in-process store)
//!   REDIS_KEY_PREFIX - Namespace for keys written to Redis
//!   RUST_LOG         - Log filter (default: info)

use hybrid_cache::cache::{
    DistributedTier, EntryOptions, HybridCache, HybridCacheConfig, InMemoryDistributedStore,
    LocalTier, MemoryStore, RedisConfig, RedisStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Hybrid Cache Demo ===");

    let config = HybridCacheConfig::builder()
        .maximum_payload_bytes(1024 * 1024)
        .maximum_key_length(256)
        .default_expiration(Duration::from_secs(5 * 60))
        .default_local_expiration(Duration::from_secs(60))
        .build();

    let local = Arc::new(MemoryStore::from_config(&config));
    local.spawn_cleanup();

    let distributed: Arc<dyn DistributedTier> = match std::env::var("REDIS_URL") {
        Ok(_) => {
            let redis = RedisConfig::from_env();
            info!("Using Redis at {}", redis.url);
            Arc::new(RedisStore::connect(&redis)?)
        }
        Err(_) => {
            info!("REDIS_URL not set, using the in-process distributed tier");
            Arc::new(InMemoryDistributedStore::new())
        }
    };

    let cache = HybridCache::new(config, local.clone(), distributed)?;

    let health = cache.health_check().await;
    info!(
        "Distributed tier: {:?} ({}ms)",
        health.status, health.response_time_ms
    );

    info!("\n--- Set (local only, tag1) ---");
    let report = cache
        .set(
            "alpha",
            "first value",
            EntryOptions::new()
                .expiration(Duration::from_secs(10 * 60))
                .local_expiration(Duration::from_secs(2 * 60))
                .disable_distributed_cache()
                .tag("tag1"),
        )
        .await?;
    info!(
        "Stored 'alpha' (local: {:?}, distributed: {:?})",
        report.local, report.distributed
    );

    info!("\n--- GetOrCreate (tag2) ---");
    for attempt in 1..=2 {
        let started = std::time::Instant::now();
        let value = cache
            .get_or_create(
                "beta",
                || async {
                    // Simulates a slow backing query
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, anyhow::Error>("generated value for 'beta'".to_string())
                },
                EntryOptions::new()
                    .expiration(Duration::from_secs(10 * 60))
                    .local_expiration(Duration::from_secs(2 * 60))
                    .tag("tag2"),
            )
            .await?;
        info!(
            "Attempt {}: {} ({}ms)",
            attempt,
            String::from_utf8_lossy(&value),
            started.elapsed().as_millis()
        );
    }

    info!("\n--- Local tier inspection ---");
    for key in ["alpha", "beta", "gamma"] {
        match local.get(key).await {
            Some(value) => info!("'{}' in local tier: {}", key, String::from_utf8_lossy(&value)),
            None => info!("'{}' not in local tier", key),
        }
    }

    info!("\n--- Remove ---");
    let report = cache.remove("alpha").await;
    info!("Removed 'alpha' (degraded: {})", report.is_degraded());

    info!("\n--- RemoveByTag ---");
    let event = cache.remove_by_tag("tag2").await;
    info!("Removed {:?} for tag2 ({} failures)", event.keys, event.failures.len());

    info!("\n--- Statistics ---");
    info!("{}", cache.stats());

    Ok(())
}
