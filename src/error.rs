//! Error types for hybrid cache operations
//!
//! This module defines the error taxonomy shared by the coordinator and the
//! tier backends. `CacheError` is `Clone` so a single failure can be handed
//! to every caller waiting on the same in-flight fetch.

use crate::cache::types::TierKind;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key or payload violates the configured limits
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A tier backend could not be reached
    #[error("{tier} tier unavailable: {message}")]
    TierUnavailable { tier: TierKind, message: String },

    /// The caller-supplied factory failed
    #[error("Factory failed for key '{key}': {cause}")]
    FactoryFailure {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    /// Entry cannot fit into the local tier even after eviction
    #[error("Capacity exceeded: entry needs {needed} bytes, limit is {limit} bytes")]
    CapacityExceeded { needed: usize, limit: usize },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Build a `TierUnavailable` error for the given tier
    pub fn unavailable(tier: TierKind, message: impl Into<String>) -> Self {
        CacheError::TierUnavailable {
            tier,
            message: message.into(),
        }
    }

    /// Wrap a factory error, keeping the original error reachable
    pub fn factory(key: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
        CacheError::FactoryFailure {
            key: key.into(),
            cause: Arc::new(error.into()),
        }
    }

    pub fn is_tier_unavailable(&self) -> bool {
        matches!(self, CacheError::TierUnavailable { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, CacheError::InvalidArgument(_))
    }

    /// The factory's own error, if this is a `FactoryFailure`
    pub fn factory_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::FactoryFailure { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
