//! Recovery domain types.

use serde::{Deserialize, Serialize};

use crate::monitor::FailureCategory;
use crate::release::QualityTier;

/// How a scheduled retry goes about getting the content again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    /// Re-search right away, for connectivity blips
    ImmediateRetry,
    /// Re-search after an exponentially growing delay
    ExponentialBackoff,
    /// Re-search constrained to the next lower quality tier
    QualityFallback,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::ImmediateRetry => "IMMEDIATE_RETRY",
            RecoveryStrategy::ExponentialBackoff => "EXPONENTIAL_BACKOFF",
            RecoveryStrategy::QualityFallback => "QUALITY_FALLBACK",
        }
    }
}

/// Outcome counters for one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyEffectiveness {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// In-flight recovery of one failed download.
///
/// A workflow exists from the first failure event until the search is
/// accepted, retries run out, or no strategy is eligible.
#[derive(Debug, Clone)]
pub struct RecoveryWorkflow {
    pub item_id: String,
    pub name: String,
    pub correlation_id: String,
    pub category: FailureCategory,
    /// Most recent failure reason
    pub reason: String,
    /// Attempts executed so far
    pub retry_count: u32,
    /// Quality tier the next search is constrained to, None when the
    /// release descriptor carried no recognizable tier
    pub current_tier: Option<QualityTier>,
    /// Strategy chosen for the next scheduled attempt
    pub next_strategy: RecoveryStrategy,
    /// Unix time a delayed attempt is due, None for zero-delay strategies
    pub scheduled_for: Option<i64>,
}
