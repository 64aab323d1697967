//! Event data model.
//!
//! Defines the core `Event` structure that producers hand to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use validator::Validate;

/// Attribute key carrying the operation duration in milliseconds.
pub const DURATION_ATTRIBUTE: &str = "duration.ms";

/// Attribute key carrying the correlation id of the owning request.
pub const CORRELATION_ATTRIBUTE: &str = "correlation.id";

/// Export urgency of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Batched on the normal lane.
    #[default]
    Normal,
    /// Exported individually on the priority lane.
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// The kind of signal an event represents.
///
/// Request correlation keeps one counter per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// A unit of work with a start and an end.
    #[default]
    Span,
    /// A numeric measurement.
    Metric,
    /// A free-form log line.
    Log,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Span => write!(f, "span"),
            Self::Metric => write!(f, "metric"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// A named instrumentation occurrence.
///
/// Names are not unique: every invocation of an instrumented operation
/// produces a new event with the same name.
///
/// # Example
///
/// ```
/// use pipeline::models::{Event, Priority};
///
/// let event = Event::new("checkout.submit")
///     .with_attribute("duration.ms", 42)
///     .with_priority(Priority::High);
///
/// assert!(event.validate_event().is_ok());
/// assert_eq!(event.duration_ms(), Some(42.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Event {
    /// Operation or occurrence name.
    #[validate(length(min = 1, message = "Event name cannot be empty"))]
    pub name: String,

    /// Signal kind, used for request correlation counters.
    #[serde(default)]
    pub kind: SignalKind,

    /// Free-form attributes inspected by the sampling rules.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Export lane.
    #[serde(default)]
    pub priority: Priority,
}

/// Errors that can occur during event validation.
#[derive(Debug, Error)]
pub enum EventValidationError {
    /// The event name is empty or whitespace.
    #[error("Event name cannot be empty")]
    EmptyName,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Event {
    /// Creates a new span event stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SignalKind::default(),
            attributes: HashMap::new(),
            timestamp: Utc::now(),
            priority: Priority::default(),
        }
    }

    /// Adds an attribute to the event.
    ///
    /// Values that cannot be represented as JSON are stored as `null`.
    ///
    /// # Example
    ///
    /// ```
    /// use pipeline::models::Event;
    ///
    /// let event = Event::new("db.query")
    ///     .with_attribute("status", "error")
    ///     .with_attribute("rows", 12);
    ///
    /// assert_eq!(event.attributes.len(), 2);
    /// ```
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.attributes.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        );
        self
    }

    /// Sets the signal kind.
    #[must_use]
    pub fn with_kind(mut self, kind: SignalKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the export priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Tags the event with the correlation id of a request.
    #[must_use]
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_attribute(CORRELATION_ATTRIBUTE, correlation_id.into())
    }

    /// Returns true when the attribute is the JSON boolean `true`.
    #[must_use]
    pub fn is_flag_set(&self, key: &str) -> bool {
        matches!(self.attributes.get(key), Some(serde_json::Value::Bool(true)))
    }

    /// Returns the attribute as a string slice, if it is a JSON string.
    #[must_use]
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(serde_json::Value::as_str)
    }

    /// Returns the `duration.ms` attribute when it is numeric.
    #[must_use]
    pub fn duration_ms(&self) -> Option<f64> {
        self.attributes
            .get(DURATION_ATTRIBUTE)
            .and_then(serde_json::Value::as_f64)
    }

    /// Returns the correlation id this event is tagged with.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.attribute_str(CORRELATION_ATTRIBUTE)
    }

    /// Validates the event.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or only whitespace.
    pub fn validate_event(&self) -> Result<(), EventValidationError> {
        if self.name.trim().is_empty() {
            return Err(EventValidationError::EmptyName);
        }
        self.validate()?;
        Ok(())
    }
}
