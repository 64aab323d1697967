//! Exponentially weighted per-operation call frequency.

use std::time::Duration;
use tokio::time::Instant;

use crate::bounded::BoundedMap;

#[derive(Debug, Clone, Copy)]
struct Frequency {
    score: f64,
    updated: Instant,
}

/// Tracks how often each operation name occurs.
///
/// Each occurrence adds one to a score that decays exponentially with time
/// constant `window`, so a steady stream of `r` events per window converges to
/// a score of roughly `r`.
#[derive(Debug)]
pub struct FrequencyTracker {
    window: Duration,
    entries: BoundedMap<String, Frequency>,
}

impl FrequencyTracker {
    /// Creates a tracker holding at most `capacity` operation names.
    #[must_use]
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            entries: BoundedMap::new(capacity),
        }
    }

    /// Records one occurrence of `name` and returns its updated score.
    pub fn record(&mut self, name: &str, now: Instant) -> f64 {
        let window = self.window;
        let (entry, evicted) = self.entries.get_or_insert_with(name.to_string(), || Frequency {
            score: 0.0,
            updated: now,
        });
        entry.score = decay(entry.score, now.saturating_duration_since(entry.updated), window) + 1.0;
        entry.updated = now;
        let score = entry.score;

        if let Some((name, _)) = evicted {
            tracing::debug!(operation = %name, "Frequency tracker full, evicted oldest operation");
        }
        score
    }

    /// Current decayed score of `name` without recording an occurrence.
    #[must_use]
    pub fn frequency(&self, name: &str, now: Instant) -> f64 {
        self.entries
            .get(&name.to_string())
            .map_or(0.0, |entry| {
                decay(
                    entry.score,
                    now.saturating_duration_since(entry.updated),
                    self.window,
                )
            })
    }

    /// Number of tracked operation names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no operation is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decay(score: f64, elapsed: Duration, window: Duration) -> f64 {
    if window.is_zero() {
        return 0.0;
    }
    score * (-elapsed.as_secs_f64() / window.as_secs_f64()).exp()
}
