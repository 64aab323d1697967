//! Sampling decisions and their statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Why an event was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingReason {
    /// Error flag, error status or critical criticality.
    ErrorOrCritical,
    /// Duration above the importance threshold.
    SlowOperation,
    /// Explicit `important` flag.
    MarkedImportant,
    /// The per-window budget is spent.
    BudgetExceeded,
    /// Kept by the adaptive random draw.
    Adaptive,
    /// Dropped by the adaptive random draw.
    RateLimited,
}

impl SamplingReason {
    /// Returns the snake-case name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorOrCritical => "error_or_critical",
            Self::SlowOperation => "slow_operation",
            Self::MarkedImportant => "marked_important",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Adaptive => "adaptive",
            Self::RateLimited => "rate_limited",
        }
    }

    /// Returns true for the rules that keep an event unconditionally.
    #[must_use]
    pub const fn is_always_keep(&self) -> bool {
        matches!(
            self,
            Self::ErrorOrCritical | Self::SlowOperation | Self::MarkedImportant
        )
    }
}

impl std::fmt::Display for SamplingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of sampling one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingDecision {
    /// Name of the evaluated event.
    pub event_name: String,
    /// Whether the event continues to the batch scheduler.
    pub kept: bool,
    /// Rule that produced the outcome.
    pub reason: SamplingReason,
}

impl SamplingDecision {
    pub(crate) fn keep(event_name: &str, reason: SamplingReason) -> Self {
        Self {
            event_name: event_name.to_string(),
            kept: true,
            reason,
        }
    }

    pub(crate) fn discard(event_name: &str, reason: SamplingReason) -> Self {
        Self {
            event_name: event_name.to_string(),
            kept: false,
            reason,
        }
    }
}

/// Point-in-time copy of the sampling counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SamplingStatsSnapshot {
    /// Events evaluated.
    pub evaluated: u64,
    /// Events kept for any reason.
    pub kept: u64,
    /// Events dropped for any reason.
    pub dropped: u64,
    /// Kept by the error/critical rule.
    pub error_or_critical: u64,
    /// Kept by the slow-operation rule.
    pub slow_operation: u64,
    /// Kept by the important flag.
    pub marked_important: u64,
    /// Dropped because the budget was spent.
    pub budget_exceeded: u64,
    /// Kept by the adaptive draw.
    pub adaptive: u64,
    /// Dropped by the adaptive draw.
    pub rate_limited: u64,
}

/// Lock-free per-reason counters.
#[derive(Debug, Default)]
pub struct SamplingStats {
    error_or_critical: AtomicU64,
    slow_operation: AtomicU64,
    marked_important: AtomicU64,
    budget_exceeded: AtomicU64,
    adaptive: AtomicU64,
    rate_limited: AtomicU64,
}

impl SamplingStats {
    /// Counts one decision.
    pub fn record(&self, reason: SamplingReason) {
        let counter = match reason {
            SamplingReason::ErrorOrCritical => &self.error_or_critical,
            SamplingReason::SlowOperation => &self.slow_operation,
            SamplingReason::MarkedImportant => &self.marked_important,
            SamplingReason::BudgetExceeded => &self.budget_exceeded,
            SamplingReason::Adaptive => &self.adaptive,
            SamplingReason::RateLimited => &self.rate_limited,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> SamplingStatsSnapshot {
        let error_or_critical = self.error_or_critical.load(Ordering::Relaxed);
        let slow_operation = self.slow_operation.load(Ordering::Relaxed);
        let marked_important = self.marked_important.load(Ordering::Relaxed);
        let budget_exceeded = self.budget_exceeded.load(Ordering::Relaxed);
        let adaptive = self.adaptive.load(Ordering::Relaxed);
        let rate_limited = self.rate_limited.load(Ordering::Relaxed);

        let kept = error_or_critical + slow_operation + marked_important + adaptive;
        let dropped = budget_exceeded + rate_limited;

        SamplingStatsSnapshot {
            evaluated: kept + dropped,
            kept,
            dropped,
            error_or_critical,
            slow_operation,
            marked_important,
            budget_exceeded,
            adaptive,
            rate_limited,
        }
    }
}
