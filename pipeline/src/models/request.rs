//! Request correlation data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::event::SignalKind;

/// Lifecycle status of a correlated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Still accepting events.
    #[default]
    Active,
    /// Ended explicitly by the producer.
    Completed,
    /// Ended by the request timeout.
    TimedOut,
    /// Force-ended to admit a newer request.
    Evicted,
}

impl RequestStatus {
    /// Returns true while the request accepts events.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Evicted => write!(f, "evicted"),
        }
    }
}

/// Summary counters maintained while a request is live.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveStats {
    /// Number of span events seen.
    pub span_count: u64,
    /// Number of metric events seen.
    pub metric_count: u64,
    /// Number of log events seen.
    pub log_count: u64,
    /// Milliseconds between request start and the last update.
    pub duration_ms: u64,
    /// Current lifecycle status.
    pub status: RequestStatus,
}

impl LiveStats {
    /// Increments the counter matching `kind`.
    pub fn record(&mut self, kind: SignalKind) {
        match kind {
            SignalKind::Span => self.span_count += 1,
            SignalKind::Metric => self.metric_count += 1,
            SignalKind::Log => self.log_count += 1,
        }
    }

    /// Total number of events seen.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.span_count + self.metric_count + self.log_count
    }
}

/// A logical unit of work that events are grouped under.
///
/// # Example
///
/// ```
/// use pipeline::models::RequestContext;
///
/// let context = RequestContext::new()
///     .with_metadata("route", "/checkout");
///
/// assert!(!context.correlation_id.is_empty());
/// assert_eq!(context.live_stats.total(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Identifier shared by all events of this request.
    pub correlation_id: String,

    /// When the request started.
    pub start_time: DateTime<Utc>,

    /// Producer-supplied description of the request.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Counters updated as events arrive.
    #[serde(default)]
    pub live_stats: LiveStats,
}

impl RequestContext {
    /// Creates a context with a generated correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_correlation_id(Uuid::new_v4().to_string())
    }

    /// Creates a context with a caller-chosen correlation id.
    #[must_use]
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            start_time: Utc::now(),
            metadata: HashMap::new(),
            live_stats: LiveStats::default(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.metadata.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        );
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
