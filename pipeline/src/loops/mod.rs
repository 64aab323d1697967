//! Execution-loop detection and circuit breaking.
//!
//! This module contains:
//! - `rapid`: per-operation execution counting over a rolling window
//! - `cycle`: the global execution chain and cycle detection
//! - `breaker`: per-operation circuit breakers
//! - `detector`: the [`LoopDetector`] tying them together

pub mod breaker;
pub mod cycle;
pub mod detector;
pub mod rapid;

pub use breaker::{BreakerRegistry, CircuitState};
pub use cycle::CycleDetector;
pub use detector::{DetectedPattern, LoopDetector, PatternKind, RECENT_PATTERN_LIMIT};
pub use rapid::RapidExecutionDetector;
