//! Per-operation circuit breakers.
//!
//! A breaker is tripped by the loop detector, stays open for the cooldown and
//! is moved to half-open by a periodic sweep. The next execution query on a
//! half-open breaker closes it again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::bounded::BoundedMap;

/// Breaker state of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Executions are allowed.
    #[default]
    Closed,
    /// Executions are blocked.
    Open,
    /// Cooldown elapsed; the next query closes the breaker.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Breaker {
    state: CircuitState,
    opened_at: Instant,
}

/// Breakers for every operation that has been tripped.
///
/// Closed breakers are not stored; an unknown operation is closed.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: BoundedMap<String, Breaker>,
}

impl BreakerRegistry {
    /// Creates a registry holding at most `capacity` non-closed breakers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            breakers: BoundedMap::new(capacity),
        }
    }

    /// Opens the breaker of `name`, restarting its cooldown.
    ///
    /// Returns true if the breaker was not already open.
    pub fn trip(&mut self, name: &str, now: Instant) -> bool {
        let breaker = Breaker {
            state: CircuitState::Open,
            opened_at: now,
        };
        let was_open = self.state(name) == CircuitState::Open;
        if let Some((evicted, _)) = self.breakers.insert(name.to_string(), breaker) {
            tracing::debug!(operation = %evicted, "Breaker registry full, evicted oldest breaker");
        }
        !was_open
    }

    /// Returns false while the breaker of `name` is open.
    ///
    /// Querying a half-open breaker closes it.
    pub fn should_execute(&mut self, name: &str) -> bool {
        let key = name.to_string();
        match self.breakers.get(&key).map(|breaker| breaker.state) {
            Some(CircuitState::Open) => false,
            Some(CircuitState::HalfOpen) => {
                self.breakers.remove(&key);
                tracing::info!(operation = %name, "Circuit breaker closed");
                true
            }
            Some(CircuitState::Closed) | None => true,
        }
    }

    /// Current state of the breaker of `name`.
    #[must_use]
    pub fn state(&self, name: &str) -> CircuitState {
        self.breakers
            .get(&name.to_string())
            .map_or(CircuitState::Closed, |breaker| breaker.state)
    }

    /// Moves every open breaker whose cooldown has elapsed to half-open.
    ///
    /// Returns the number of breakers moved.
    pub fn sweep(&mut self, now: Instant, cooldown: Duration) -> usize {
        let mut moved = 0;
        for (name, breaker) in self.breakers.iter_mut() {
            if breaker.state == CircuitState::Open
                && now.saturating_duration_since(breaker.opened_at) >= cooldown
            {
                breaker.state = CircuitState::HalfOpen;
                moved += 1;
                tracing::info!(operation = %name, "Circuit breaker half-open");
            }
        }
        moved
    }

    /// Number of stored breakers, open or half-open.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.breakers.len()
    }

    /// Number of breakers currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.breakers
            .iter()
            .filter(|(_, breaker)| breaker.state == CircuitState::Open)
            .count()
    }
}
