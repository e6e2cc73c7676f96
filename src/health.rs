//! Distributed tier health checks
//!
//! Checks the distributed tier with a bounded round-trip, classifying the
//! result as healthy, degraded (slow) or unhealthy, with optional retries.
//! The local tier lives in-process and is not checked.

use crate::cache::tier::DistributedTier;
use crate::cache::types::TierKind;
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Configuration for health check behavior
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Timeout for a single check
    pub timeout: Duration,
    /// Whether to retry failed checks
    pub enable_retries: bool,
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Delay between retry attempts
    pub retry_delay: Duration,
    /// Response time above which the tier counts as degraded (milliseconds)
    pub degraded_threshold_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            enable_retries: true,
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
            degraded_threshold_ms: 250,
        }
    }
}

impl HealthCheckConfig {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            enable_retries: false,
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Tier is reachable and responsive
    Healthy,
    /// Tier is reachable but slow (above degraded threshold)
    Degraded,
    /// Tier is unreachable or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Overall health status
    pub status: HealthStatus,
    /// Tier that was checked
    pub tier: TierKind,
    /// Response time of the last attempt in milliseconds
    pub response_time_ms: u64,
    /// Timestamp of the health check
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
    /// Number of retry attempts made
    pub retry_count: u32,
}

impl HealthCheckResult {
    fn healthy(response_time: Duration, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            tier: TierKind::Distributed,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
        }
    }

    fn unhealthy(response_time: Duration, error: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            tier: TierKind::Distributed,
            response_time_ms: response_time.as_millis() as u64,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            retry_count: 0,
        }
    }

    fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Check the tier once, bounded by the configured timeout
pub async fn check_once(tier: &dyn DistributedTier, config: &HealthCheckConfig) -> HealthCheckResult {
    debug!("Probing distributed tier");
    let start = Instant::now();

    match tokio::time::timeout(config.timeout, tier.ping()).await {
        Ok(Ok(())) => {
            let elapsed = start.elapsed();
            debug!("Distributed tier check passed ({}ms)", elapsed.as_millis());
            HealthCheckResult::healthy(elapsed, config.degraded_threshold_ms)
        }
        Ok(Err(e)) => {
            error!("Distributed tier check failed: {}", e);
            HealthCheckResult::unhealthy(start.elapsed(), &e.to_string())
        }
        Err(_) => {
            let e = CacheError::Timeout {
                timeout_ms: config.timeout.as_millis() as u64,
                context: "distributed tier ping".to_string(),
            };
            error!("Distributed tier check failed: {}", e);
            HealthCheckResult::unhealthy(start.elapsed(), &e.to_string())
        }
    }
}

/// Check the tier, retrying unhealthy results as configured
pub async fn check_with_retry(
    tier: &dyn DistributedTier,
    config: &HealthCheckConfig,
) -> HealthCheckResult {
    let max_retries = if config.enable_retries {
        config.max_retries
    } else {
        0
    };
    let mut retry_count = 0;

    loop {
        let result = check_once(tier, config).await;

        if result.status.is_operational() || retry_count >= max_retries {
            return result.with_retry_count(retry_count);
        }

        retry_count += 1;
        warn!(
            "Health check failed (attempt {}/{}), retrying after {:?}",
            retry_count,
            max_retries + 1,
            config.retry_delay
        );
        tokio::time::sleep(config.retry_delay).await;
    }
}
