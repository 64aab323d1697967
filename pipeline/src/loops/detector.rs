//! The loop detector.
//!
//! Every execution record passes through both anomaly detectors. Either one
//! trips the breaker of the offending operation, and the producer is expected
//! to consult [`LoopDetector::should_execute`] before invoking it again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::breaker::{BreakerRegistry, CircuitState};
use super::cycle::CycleDetector;
use super::rapid::RapidExecutionDetector;
use crate::bounded::BoundedMap;
use crate::config::PipelineConfig;
use crate::models::{ExecutionMetadata, ExecutionRecord};
use crate::sync::lock;

/// Number of detected patterns kept for inspection.
pub const RECENT_PATTERN_LIMIT: usize = 100;

/// Kind of anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// One operation ran too often inside the rapid window.
    RapidExecution,
    /// An operation reappeared in the execution chain.
    CircularDependency,
}

impl PatternKind {
    /// Returns the kind as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RapidExecution => "rapid_execution",
            Self::CircularDependency => "circular_dependency",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An anomaly reported by the loop detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    /// What was detected.
    pub kind: PatternKind,

    /// Operations involved. A single name for rapid execution, the cycle
    /// members in chain order for a circular dependency.
    pub operations: Vec<String>,

    /// When the anomaly was detected.
    pub detected_at: DateTime<Utc>,
}

impl DetectedPattern {
    fn new(kind: PatternKind, operations: Vec<String>) -> Self {
        Self {
            kind,
            operations,
            detected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ExecutionCounter {
    count: u64,
    last: Instant,
}

#[derive(Debug)]
struct DetectorState {
    rapid: RapidExecutionDetector,
    cycles: CycleDetector,
    breakers: BreakerRegistry,
    executions: BoundedMap<String, ExecutionCounter>,
    recent: VecDeque<DetectedPattern>,
}

impl DetectorState {
    fn remember(&mut self, pattern: DetectedPattern) {
        if self.recent.len() == RECENT_PATTERN_LIMIT {
            self.recent.pop_front();
        }
        self.recent.push_back(pattern);
    }

    fn next_metadata(&mut self, name: &str, now: Instant) -> ExecutionMetadata {
        let (counter, _) = self
            .executions
            .get_or_insert_with(name.to_string(), || ExecutionCounter { count: 0, last: now });

        let since_last = (counter.count > 0)
            .then(|| now.saturating_duration_since(counter.last).as_secs_f64() * 1_000.0);
        counter.count += 1;
        counter.last = now;

        ExecutionMetadata {
            execution_count: counter.count,
            time_since_last_execution_ms: since_last,
        }
    }
}

/// Detects runaway operations and drives their circuit breakers.
///
/// # Example
///
/// ```
/// use pipeline::config::PipelineConfig;
/// use pipeline::loops::{CircuitState, LoopDetector, PatternKind};
/// use pipeline::models::ExecutionRecord;
///
/// let detector = LoopDetector::new(&PipelineConfig::default());
/// for name in ["A", "B", "C"] {
///     assert!(detector.record_execution(&ExecutionRecord::new(name, 1.0)).is_empty());
/// }
///
/// let patterns = detector.record_execution(&ExecutionRecord::new("A", 1.0));
/// assert_eq!(patterns[0].kind, PatternKind::CircularDependency);
/// assert_eq!(patterns[0].operations, ["A", "B", "C"]);
/// assert_eq!(detector.circuit_state("A"), CircuitState::Open);
/// assert!(!detector.should_execute("A"));
/// ```
#[derive(Debug)]
pub struct LoopDetector {
    cooldown: Duration,
    state: Mutex<DetectorState>,
}

impl LoopDetector {
    /// Creates a detector from the pipeline configuration.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let capacity = config.max_tracked_operations;
        let state = DetectorState {
            rapid: RapidExecutionDetector::new(
                config.rapid_execution_threshold,
                config.rapid_window(),
                capacity,
            ),
            cycles: CycleDetector::new(config.cycle_chain_max_length),
            breakers: BreakerRegistry::new(capacity),
            executions: BoundedMap::new(capacity),
            recent: VecDeque::with_capacity(RECENT_PATTERN_LIMIT),
        };

        Self {
            cooldown: config.breaker_cooldown(),
            state: Mutex::new(state),
        }
    }

    /// Feeds one execution to both detectors.
    ///
    /// Returns the patterns this execution triggered, usually none. Records
    /// without an operation name are ignored.
    pub fn record_execution(&self, record: &ExecutionRecord) -> Vec<DetectedPattern> {
        if !record.has_operation_name() {
            return Vec::new();
        }
        let name = record.operation_name.as_str();
        let now = Instant::now();
        let mut state = lock(&self.state);
        let mut patterns = Vec::new();

        if state.rapid.record(name, now) {
            patterns.push(DetectedPattern::new(
                PatternKind::RapidExecution,
                vec![name.to_string()],
            ));
        }
        if let Some(cycle) = state.cycles.record(name) {
            patterns.push(DetectedPattern::new(PatternKind::CircularDependency, cycle));
        }

        for pattern in &patterns {
            let opened = state.breakers.trip(name, now);
            tracing::warn!(
                pattern = %pattern.kind,
                operation = %name,
                operations = ?pattern.operations,
                "Execution loop detected"
            );
            if opened {
                tracing::warn!(operation = %name, "Circuit breaker opened");
            }
            state.remember(pattern.clone());
        }
        patterns
    }

    /// Builds an execution record with tracked metadata and records it.
    ///
    /// Returns the record along with the patterns it triggered.
    pub fn track_execution(
        &self,
        name: &str,
        duration_ms: f64,
    ) -> (ExecutionRecord, Vec<DetectedPattern>) {
        let metadata = lock(&self.state).next_metadata(name, Instant::now());
        let record = ExecutionRecord::new(name, duration_ms).with_metadata(metadata);
        let patterns = self.record_execution(&record);
        (record, patterns)
    }

    /// Runs `operation` unless its breaker is open, then tracks the execution.
    ///
    /// Returns `None` without running `operation` when the breaker is open.
    pub fn execute_guarded<T, F>(&self, name: &str, operation: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        if !self.should_execute(name) {
            tracing::debug!(operation = %name, "Skipped execution, circuit open");
            return None;
        }
        let started = Instant::now();
        let output = operation();
        self.track_execution(name, started.elapsed().as_secs_f64() * 1_000.0);
        Some(output)
    }

    /// Returns false while the breaker of `name` is open.
    ///
    /// A half-open breaker is closed by this call and the execution allowed.
    pub fn should_execute(&self, name: &str) -> bool {
        lock(&self.state).breakers.should_execute(name)
    }

    /// Current breaker state of `name`.
    #[must_use]
    pub fn circuit_state(&self, name: &str) -> CircuitState {
        lock(&self.state).breakers.state(name)
    }

    /// Moves open breakers whose cooldown elapsed to half-open.
    pub fn sweep_breakers(&self) -> usize {
        let moved = lock(&self.state).breakers.sweep(Instant::now(), self.cooldown);
        if moved > 0 {
            tracing::debug!(moved, "Breaker sweep finished");
        }
        moved
    }

    /// Number of breakers currently open.
    #[must_use]
    pub fn open_breakers(&self) -> usize {
        lock(&self.state).breakers.open_count()
    }

    /// Most recently detected patterns, oldest first.
    #[must_use]
    pub fn recent_patterns(&self) -> Vec<DetectedPattern> {
        lock(&self.state).recent.iter().cloned().collect()
    }
}
