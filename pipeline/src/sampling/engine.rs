//! The sampling-decision engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use tokio::time::Instant;

use super::budget::Budget;
use super::decision::{SamplingDecision, SamplingReason, SamplingStats, SamplingStatsSnapshot};
use super::frequency::FrequencyTracker;
use crate::config::PipelineConfig;
use crate::models::Event;
use crate::sync::lock;

/// Computes the adaptive keep-rate for an operation.
///
/// `base_rate / (1 + log10(1 + frequency))`, scaled by the environment
/// multiplier and clamped to `[min_rate, max_rate]`. Non-increasing in
/// `frequency`.
///
/// # Example
///
/// ```
/// use pipeline::sampling::compute_rate;
///
/// let idle = compute_rate(0.5, 0.0, 1.0, 0.01, 1.0);
/// let busy = compute_rate(0.5, 999.0, 1.0, 0.01, 1.0);
/// assert!((idle - 0.5).abs() < 1e-9);
/// assert!((busy - 0.125).abs() < 1e-9);
/// ```
#[must_use]
pub fn compute_rate(
    base_rate: f64,
    frequency: f64,
    multiplier: f64,
    min_rate: f64,
    max_rate: f64,
) -> f64 {
    let damped = base_rate / (1.0 + (1.0 + frequency.max(0.0)).log10());
    (damped * multiplier).clamp(min_rate, max_rate)
}

/// Decides, per event, whether it is kept.
///
/// Rules are evaluated in priority order; the first match wins:
/// error/critical, slow operation, important flag, budget exhausted, adaptive
/// draw. Only adaptively kept events spend budget.
#[derive(Debug)]
pub struct SamplingEngine {
    base_rate: f64,
    min_rate: f64,
    max_rate: f64,
    multiplier: f64,
    importance_threshold_ms: f64,
    budget: Budget,
    frequencies: Mutex<FrequencyTracker>,
    rng: Mutex<StdRng>,
    stats: SamplingStats,
}

impl SamplingEngine {
    /// Creates an engine seeded from the operating system.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Creates an engine drawing from the given generator.
    #[must_use]
    pub fn with_rng(config: &PipelineConfig, rng: StdRng) -> Self {
        Self {
            base_rate: config.base_rate,
            min_rate: config.min_rate,
            max_rate: config.max_rate,
            multiplier: config.environment_multiplier(),
            importance_threshold_ms: config.importance_threshold_ms,
            budget: Budget::new(config.budget_per_minute),
            frequencies: Mutex::new(FrequencyTracker::new(
                config.adaptive_window(),
                config.max_tracked_operations,
            )),
            rng: Mutex::new(rng),
            stats: SamplingStats::default(),
        }
    }

    /// Decides whether `event` is kept.
    ///
    /// Always records the occurrence in the frequency tracker first, so
    /// frequency reflects call volume rather than sampled volume.
    pub fn decide(&self, event: &Event) -> SamplingDecision {
        let frequency = lock(&self.frequencies).record(&event.name, Instant::now());

        let decision = if let Some(reason) = self.always_keep_reason(event) {
            SamplingDecision::keep(&event.name, reason)
        } else if self.budget.is_exhausted() {
            SamplingDecision::discard(&event.name, SamplingReason::BudgetExceeded)
        } else {
            let rate = self.rate_for(frequency);
            let draw: f64 = lock(&self.rng).gen();
            if draw >= rate {
                SamplingDecision::discard(&event.name, SamplingReason::RateLimited)
            } else if self.budget.try_consume() {
                SamplingDecision::keep(&event.name, SamplingReason::Adaptive)
            } else {
                // Another producer took the last unit since the check above.
                SamplingDecision::discard(&event.name, SamplingReason::BudgetExceeded)
            }
        };

        self.stats.record(decision.reason);
        tracing::trace!(
            event = %event.name,
            kept = decision.kept,
            reason = %decision.reason,
            "Sampling decision"
        );
        decision
    }

    /// Current adaptive rate of `name`, without recording an occurrence.
    #[must_use]
    pub fn adaptive_rate(&self, name: &str) -> f64 {
        let frequency = lock(&self.frequencies).frequency(name, Instant::now());
        self.rate_for(frequency)
    }

    /// Resets the budget to its ceiling.
    pub fn refill_budget(&self) {
        let left = self.budget.remaining();
        self.budget.refill();
        tracing::debug!(
            unused = left,
            ceiling = self.budget.ceiling(),
            "Sampling budget refilled"
        );
    }

    /// The per-window budget.
    #[must_use]
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Copies the decision counters.
    #[must_use]
    pub fn stats(&self) -> SamplingStatsSnapshot {
        self.stats.snapshot()
    }

    fn rate_for(&self, frequency: f64) -> f64 {
        compute_rate(
            self.base_rate,
            frequency,
            self.multiplier,
            self.min_rate,
            self.max_rate,
        )
    }

    fn always_keep_reason(&self, event: &Event) -> Option<SamplingReason> {
        if event.is_flag_set("error")
            || event.attribute_str("status") == Some("error")
            || event.attribute_str("criticality") == Some("critical")
        {
            return Some(SamplingReason::ErrorOrCritical);
        }
        if event
            .duration_ms()
            .is_some_and(|duration| duration > self.importance_threshold_ms)
        {
            return Some(SamplingReason::SlowOperation);
        }
        if event.is_flag_set("important") {
            return Some(SamplingReason::MarkedImportant);
        }
        None
    }
}
