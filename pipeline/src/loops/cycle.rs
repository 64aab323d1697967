//! Circular-dependency detection over the global execution chain.

/// Rolling chain of recently executed operation names.
#[derive(Debug)]
pub struct CycleDetector {
    max_length: usize,
    chain: Vec<String>,
}

impl CycleDetector {
    /// Creates a detector whose chain is reset once it exceeds `max_length`.
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(2),
            chain: Vec::new(),
        }
    }

    /// Appends `name` to the chain.
    ///
    /// Returns the cycle members, starting at the earlier occurrence of
    /// `name`, when `name` is already on the chain. The chain is reset in
    /// that case. Repeating the last name is ignored.
    pub fn record(&mut self, name: &str) -> Option<Vec<String>> {
        if self.chain.last().is_some_and(|last| last == name) {
            return None;
        }

        if let Some(start) = self.chain.iter().position(|seen| seen == name) {
            let cycle = self.chain.split_off(start);
            self.chain.clear();
            return Some(cycle);
        }

        self.chain.push(name.to_string());
        if self.chain.len() > self.max_length {
            tracing::trace!(length = self.chain.len(), "Execution chain reset");
            self.chain.clear();
        }
        None
    }

    /// Current chain, oldest first.
    #[must_use]
    pub fn chain(&self) -> &[String] {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_three_step_cycle() {
        let mut detector = CycleDetector::new(10);

        assert!(detector.record("A").is_none());
        assert!(detector.record("B").is_none());
        assert!(detector.record("C").is_none());
        let cycle = detector.record("A");

        assert_eq!(cycle, Some(vec!["A".to_string(), "B".to_string(), "C".to_string()]));
        assert!(detector.chain().is_empty());
    }

    #[test]
    fn test_cycle_starts_at_earlier_occurrence() {
        let mut detector = CycleDetector::new(10);
        for name in ["X", "A", "B"] {
            detector.record(name);
        }

        assert_eq!(
            detector.record("A"),
            Some(vec!["A".to_string(), "B".to_string()])
        );
    }

    #[test]
    fn test_self_repeat_is_ignored() {
        let mut detector = CycleDetector::new(10);
        detector.record("A");
        detector.record("B");

        assert!(detector.record("B").is_none());
        assert_eq!(detector.chain(), ["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_long_chain_resets() {
        let mut detector = CycleDetector::new(3);
        for name in ["a", "b", "c"] {
            detector.record(name);
        }
        assert_eq!(detector.chain().len(), 3);

        assert!(detector.record("d").is_none());
        assert!(detector.chain().is_empty());

        // "a" was forgotten with the reset.
        assert!(detector.record("a").is_none());
    }

    #[test]
    fn test_no_cycle_after_report_reset() {
        let mut detector = CycleDetector::new(10);
        for name in ["A", "B", "A"] {
            detector.record(name);
        }

        assert!(detector.record("B").is_none());
        assert!(detector.record("A").is_none());
        assert_eq!(
            detector.record("B"),
            Some(vec!["B".to_string(), "A".to_string()])
        );
    }
}
