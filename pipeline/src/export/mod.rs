//! Export of kept events.
//!
//! This module contains the sink abstraction, the retry schedules and the
//! two-lane [`BatchScheduler`] that sits between sampling and the sink.

pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod stats;

pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{BatchScheduler, FlushReport};
pub use sink::{EventSink, InMemorySink, SinkError};
pub use stats::{ExportStats, ExportStatsSnapshot};
