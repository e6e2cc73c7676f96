//! Per-tier outcome reporting for writes and removals
//!
//! Tier failures on these paths are non-fatal: the coordinator finishes the
//! operation on the other tier and hands the failure back as a warning.

use crate::cache::types::TierKind;
use crate::error::CacheError;

/// What happened on one tier
#[derive(Debug, Clone)]
pub enum TierOutcome {
    /// The operation was applied
    Applied,

    /// The tier was not touched (disabled by a per-call flag)
    Skipped,

    /// The tier failed; the error is a warning, not a rollback trigger
    Failed(CacheError),
}

impl TierOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TierOutcome::Applied)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TierOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&CacheError> {
        match self {
            TierOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of a `set` or `remove` across both tiers
#[derive(Debug, Clone)]
pub struct WriteReport {
    pub local: TierOutcome,
    pub distributed: TierOutcome,
}

impl WriteReport {
    pub fn new(local: TierOutcome, distributed: TierOutcome) -> Self {
        Self { local, distributed }
    }

    /// Outcome for one tier
    pub fn tier(&self, tier: TierKind) -> &TierOutcome {
        match tier {
            TierKind::Local => &self.local,
            TierKind::Distributed => &self.distributed,
        }
    }

    /// At least one tier applied the operation
    pub fn any_applied(&self) -> bool {
        self.local.is_applied() || self.distributed.is_applied()
    }

    /// Some tier failed
    pub fn is_degraded(&self) -> bool {
        self.local.is_failed() || self.distributed.is_failed()
    }

    /// Failures worth surfacing as warnings
    pub fn warnings(&self) -> Vec<&CacheError> {
        [&self.local, &self.distributed]
            .into_iter()
            .filter_map(TierOutcome::error)
            .collect()
    }
}
