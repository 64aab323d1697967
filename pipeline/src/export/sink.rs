//! Sink trait and an in-memory implementation.
//!
//! The `EventSink` trait is the pipeline's only connection to the outside
//! world. Transport (HTTP, gRPC, files) is the implementor's concern.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::models::Event;
use crate::sync::lock;

/// Errors a sink reports for a failed export.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The destination could not be reached.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The destination refused the payload.
    #[error("Sink rejected export: {0}")]
    Rejected(String),
}

/// Destination for exported events.
///
/// Implementations must be thread-safe (Send + Sync); the scheduler calls them
/// from background tasks.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Exports one normal-lane batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch was not accepted.
    async fn export(&self, batch: &[Event]) -> Result<(), SinkError>;

    /// Exports one priority-lane event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event was not accepted.
    async fn export_one(&self, event: &Event) -> Result<(), SinkError>;
}

/// In-memory sink implementation.
///
/// Records every exported batch and event. It is suitable for development and
/// testing; failures and latency can be injected.
///
/// # Example
///
/// ```
/// use pipeline::export::{EventSink, InMemorySink};
/// use pipeline::models::Event;
///
/// # tokio_test::block_on(async {
/// let sink = InMemorySink::new();
/// sink.export(&[Event::new("a"), Event::new("b")]).await.unwrap();
///
/// assert_eq!(sink.batch_count(), 1);
/// assert_eq!(sink.exported_event_count(), 2);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemorySink {
    batches: Mutex<Vec<Vec<Event>>>,
    singles: Mutex<Vec<Event>>,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
    latency: Option<Duration>,
}

impl InMemorySink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new sink wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Delays every export call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next `count` export calls fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Exported batches, oldest first.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<Event>> {
        lock(&self.batches).clone()
    }

    /// Individually exported events, oldest first.
    #[must_use]
    pub fn single_events(&self) -> Vec<Event> {
        lock(&self.singles).clone()
    }

    /// Number of exported batches.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        lock(&self.batches).len()
    }

    /// Number of events across all exported batches.
    #[must_use]
    pub fn exported_event_count(&self) -> usize {
        lock(&self.batches).iter().map(Vec::len).sum()
    }

    /// Number of export calls, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        lock(&self.batches).clear();
        lock(&self.singles).clear();
    }

    async fn begin_call(&self) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SinkError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn export(&self, batch: &[Event]) -> Result<(), SinkError> {
        self.begin_call().await?;
        lock(&self.batches).push(batch.to_vec());
        Ok(())
    }

    async fn export_one(&self, event: &Event) -> Result<(), SinkError> {
        self.begin_call().await?;
        lock(&self.singles).push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_batches_and_singles() {
        let sink = InMemorySink::new();

        sink.export(&[Event::new("a")]).await.unwrap();
        sink.export(&[Event::new("b"), Event::new("c")]).await.unwrap();
        sink.export_one(&Event::new("urgent")).await.unwrap();

        assert_eq!(sink.batch_count(), 2);
        assert_eq!(sink.exported_event_count(), 3);
        assert_eq!(sink.single_events()[0].name, "urgent");
        assert_eq!(sink.attempts(), 3);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let sink = InMemorySink::new();
        sink.fail_next(2);

        assert!(sink.export(&[Event::new("a")]).await.is_err());
        assert!(sink.export_one(&Event::new("b")).await.is_err());
        assert!(sink.export(&[Event::new("c")]).await.is_ok());

        assert_eq!(sink.batch_count(), 1);
        assert_eq!(sink.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let sink = InMemorySink::new().with_latency(Duration::from_millis(250));
        let started = tokio::time::Instant::now();

        sink.export_one(&Event::new("a")).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_clear() {
        let sink = InMemorySink::new();
        sink.export(&[Event::new("a")]).await.unwrap();
        sink.clear();
        assert_eq!(sink.batch_count(), 0);
    }
}
