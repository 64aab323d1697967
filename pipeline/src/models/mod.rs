//! Data models shared by every pipeline component.
//!
//! This module contains events, execution records and request contexts.

pub mod event;
pub mod execution;
pub mod request;

pub use event::{
    Event, EventValidationError, Priority, SignalKind, CORRELATION_ATTRIBUTE, DURATION_ATTRIBUTE,
};
pub use execution::{ExecutionMetadata, ExecutionRecord};
pub use request::{LiveStats, RequestContext, RequestStatus};
