//! Sampling: decides which events are kept.
//!
//! The [`SamplingEngine`] combines always-keep rules, a hard-reset per-window
//! [`Budget`] and an adaptive rate damped by per-operation frequency.

pub mod budget;
pub mod decision;
pub mod engine;
pub mod frequency;

pub use budget::Budget;
pub use decision::{SamplingDecision, SamplingReason, SamplingStats, SamplingStatsSnapshot};
pub use engine::{compute_rate, SamplingEngine};
pub use frequency::FrequencyTracker;
