//! Execution record data model.
//!
//! One `ExecutionRecord` is produced per invocation of a tracked operation and
//! fed to the loop detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bookkeeping attached to an execution by the execution tracker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// How many times the operation has run, including this execution.
    pub execution_count: u64,

    /// Milliseconds since the previous execution of the same operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_last_execution_ms: Option<f64>,
}

/// A single invocation of a tracked operation.
///
/// # Example
///
/// ```
/// use pipeline::models::ExecutionRecord;
///
/// let record = ExecutionRecord::new("cart.recalculate", 3.5);
/// assert_eq!(record.operation_name, "cart.recalculate");
/// assert!(!record.execution_id.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Name of the operation that ran.
    pub operation_name: String,

    /// Unique id of this invocation.
    pub execution_id: String,

    /// When the invocation happened.
    pub timestamp: DateTime<Utc>,

    /// Wall-clock duration of the invocation.
    pub duration_ms: f64,

    /// Per-operation counters.
    #[serde(default)]
    pub metadata: ExecutionMetadata,
}

impl ExecutionRecord {
    /// Creates a record with a fresh execution id and empty metadata.
    #[must_use]
    pub fn new(operation_name: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            operation_name: operation_name.into(),
            execution_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            duration_ms,
            metadata: ExecutionMetadata::default(),
        }
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ExecutionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns true when the record names an operation.
    #[must_use]
    pub fn has_operation_name(&self) -> bool {
        !self.operation_name.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_ids_are_unique() {
        let a = ExecutionRecord::new("op", 1.0);
        let b = ExecutionRecord::new("op", 1.0);
        assert_ne!(a.execution_id, b.execution_id);
    }

    #[test]
    fn test_with_metadata() {
        let record = ExecutionRecord::new("op", 2.0).with_metadata(ExecutionMetadata {
            execution_count: 4,
            time_since_last_execution_ms: Some(12.5),
        });

        assert_eq!(record.metadata.execution_count, 4);
        assert_eq!(record.metadata.time_since_last_execution_ms, Some(12.5));
    }

    #[test]
    fn test_has_operation_name() {
        assert!(ExecutionRecord::new("op", 0.0).has_operation_name());
        assert!(!ExecutionRecord::new(" ", 0.0).has_operation_name());
    }

    #[test]
    fn test_first_execution_omits_time_since_last() {
        let record = ExecutionRecord::new("op", 0.0);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("time_since_last_execution_ms"));
    }
}
