//! Per-window sampling budget.

use std::sync::atomic::{AtomicU32, Ordering};

/// An all-or-nothing allowance of adaptively kept events per window.
///
/// The counter is hard-reset to its ceiling by [`Budget::refill`]; it is not a
/// continuously refilling token bucket. An unsigned counter that only ever
/// decrements through `checked_sub` cannot go below zero.
#[derive(Debug)]
pub struct Budget {
    remaining: AtomicU32,
    ceiling: u32,
}

impl Budget {
    /// Creates a full budget.
    #[must_use]
    pub fn new(ceiling: u32) -> Self {
        Self {
            remaining: AtomicU32::new(ceiling),
            ceiling,
        }
    }

    /// Units left in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Value restored by every refill.
    #[must_use]
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Returns true when no unit is left.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes one unit. Returns false if the budget was already empty.
    pub fn try_consume(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }

    /// Resets the counter to the ceiling.
    pub fn refill(&self) {
        self.remaining.store(self.ceiling, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_budget_is_full() {
        let budget = Budget::new(5);
        assert_eq!(budget.remaining(), 5);
        assert_eq!(budget.ceiling(), 5);
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_consume_stops_at_zero() {
        let budget = Budget::new(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.remaining(), 0);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_refill_is_a_hard_reset() {
        let budget = Budget::new(3);
        budget.try_consume();
        budget.refill();
        assert_eq!(budget.remaining(), 3);

        budget.refill();
        assert_eq!(budget.remaining(), 3);
    }

    #[test]
    fn test_concurrent_consumers_never_overdraw() {
        let budget = std::sync::Arc::new(Budget::new(100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = budget.clone();
                std::thread::spawn(move || (0..50).filter(|_| budget.try_consume()).count())
            })
            .collect();

        let consumed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(consumed, 100);
        assert_eq!(budget.remaining(), 0);
    }
}
