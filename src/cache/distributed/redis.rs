//! Redis-backed distributed tier

use crate::cache::{
    config::RedisConfig,
    entry::MAX_EXPIRATION,
    tier::DistributedTier,
    types::{Payload, TierKind},
};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Distributed tier stored in Redis
///
/// Keys are written as `{key_prefix}{key}` so several applications can share
/// one server. Every failure, from pool checkout to command execution, is
/// reported as `TierUnavailable`.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisStore {
    /// Build a pooled store; no connection is opened until first use
    pub fn connect(config: &RedisConfig) -> Result<Self> {
        info!(url = %config.url, pool_size = config.pool_size, "Creating Redis pool");

        let mut redis_config = Config::from_url(&config.url);
        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts.wait = Some(config.timeout);
        pool_config.timeouts.create = Some(config.timeout);
        pool_config.timeouts.recycle = Some(config.timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Config(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self::from_pool(pool, config.key_prefix.clone()))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| {
            warn!(error = %e, "Failed to get Redis connection");
            CacheError::unavailable(TierKind::Distributed, format!("connection pool: {}", e))
        })
    }
}

/// TTL for `SET PX`, capped at `MAX_EXPIRATION`; PX rejects 0, so
/// sub-millisecond TTLs round up
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.min(MAX_EXPIRATION).as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

fn command_error(op: &str, key: &str, e: redis::RedisError) -> CacheError {
    warn!(key = %key, error = %e, "Redis {} error", op);
    CacheError::unavailable(TierKind::Distributed, format!("{} failed: {}", op, e))
}

#[async_trait]
impl DistributedTier for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Payload>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(self.namespaced(key))
            .await
            .map_err(|e| command_error("GET", key, e))?;

        debug!(key = %key, hit = value.is_some(), "Redis GET");
        Ok(value.map(Payload::from))
    }

    async fn set(&self, key: &str, payload: Payload, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl_millis(ttl);

        let _: () = redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(&payload[..])
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SET", key, e))?;

        debug!(key = %key, ttl_ms = ttl_ms, "Redis SET");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(self.namespaced(key))
            .await
            .map_err(|e| command_error("DEL", key, e))?;

        debug!(key = %key, "Redis DEL");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("PING", "-", e))?;
        Ok(())
    }
}
