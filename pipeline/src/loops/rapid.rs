//! Rapid-execution detection.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::bounded::BoundedMap;

/// Counts executions of each operation inside a rolling time window.
#[derive(Debug)]
pub struct RapidExecutionDetector {
    threshold: usize,
    window: Duration,
    windows: BoundedMap<String, VecDeque<Instant>>,
}

impl RapidExecutionDetector {
    /// Flags an operation once it runs more than `threshold` times within
    /// `window`. At most `capacity` operations are tracked.
    #[must_use]
    pub fn new(threshold: usize, window: Duration, capacity: usize) -> Self {
        Self {
            threshold,
            window,
            windows: BoundedMap::new(capacity),
        }
    }

    /// Records one execution at `now`.
    ///
    /// Returns true when the operation crossed the threshold. Its window is
    /// then cleared, so a single burst is reported once.
    pub fn record(&mut self, name: &str, now: Instant) -> bool {
        let window = self.window;
        let (timestamps, evicted) = self
            .windows
            .get_or_insert_with(name.to_string(), VecDeque::new);

        while timestamps
            .front()
            .is_some_and(|&seen| now.saturating_duration_since(seen) >= window)
        {
            timestamps.pop_front();
        }
        timestamps.push_back(now);

        let rapid = timestamps.len() > self.threshold;
        if rapid {
            timestamps.clear();
        }

        if let Some((operation, _)) = evicted {
            tracing::debug!(%operation, "Rapid-execution tracker full, evicted oldest operation");
        }
        rapid
    }

    /// Executions of `name` currently inside its window.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.windows.get(&name.to_string()).map_or(0, VecDeque::len)
    }

    /// Number of tracked operations.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
