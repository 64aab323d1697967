//! Request-scoped event correlation.
//!
//! A request is admitted with [`RequestCorrelator::request_start`], collects
//! events until it is ended explicitly, times out or is evicted to make room,
//! and then keeps its final [`LiveStats`](crate::models::LiveStats) readable for a retention period.

pub mod correlator;

pub use correlator::{
    CorrelationError, RequestCorrelator, RequestHandle, EVENT_STREAM_CAPACITY,
};
