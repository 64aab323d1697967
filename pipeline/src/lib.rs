//! Vigil Telemetry Pipeline
//!
//! This crate turns a stream of instrumentation events into a bounded,
//! prioritized stream of exported batches, and protects the host from
//! telemetry-induced resource exhaustion along the way.
//!
//! # Modules
//!
//! - [`models`] - Events, execution records and request contexts
//! - [`config`] - Pipeline configuration and environment handling
//! - [`sampling`] - Adaptive, budgeted keep/drop decisions
//! - [`export`] - Two-lane batch scheduler and the sink abstraction
//! - [`loops`] - Execution-loop detection and circuit breakers
//! - [`correlation`] - Request-scoped event grouping
//! - [`pipeline`] - The [`TelemetryPipeline`] tying everything together
//!
//! # Example
//!
//! ```
//! use pipeline::config::PipelineConfig;
//! use pipeline::export::InMemorySink;
//! use pipeline::models::Event;
//! use pipeline::TelemetryPipeline;
//!
//! # tokio_test::block_on(async {
//! let sink = InMemorySink::new_shared();
//! let telemetry = TelemetryPipeline::new(PipelineConfig::default(), sink.clone()).unwrap();
//! telemetry.start();
//!
//! let event = Event::new("checkout.submit")
//!     .with_attribute("duration.ms", 2_500)
//!     .with_attribute("user_id", "12345");
//! let decision = telemetry.submit(event).unwrap();
//! assert!(decision.kept);
//!
//! telemetry.shutdown().await;
//! assert_eq!(sink.exported_event_count(), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bounded;
pub mod config;
pub mod correlation;
pub mod export;
pub mod loops;
pub mod models;
pub mod pipeline;
pub mod sampling;

mod sync;

pub use pipeline::{IngressError, PipelineStats, TelemetryPipeline};

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
