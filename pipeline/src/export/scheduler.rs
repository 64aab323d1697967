//! Two-lane batch scheduler.
//!
//! Kept events wait in one of two bounded queues:
//!
//! - the **priority lane** exports events one at a time, in submission order,
//!   with a short fixed retry;
//! - the **normal lane** accumulates events and exports them in batches of at
//!   most `max_batch_size`, flushing on a timer or as soon as the queue reaches
//!   the auto-flush size, with exponential-backoff retries.
//!
//! Both queues drop their oldest events when full. Producers only ever touch
//! the queues; every sink call happens on a background task.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::retry::RetryPolicy;
use super::sink::EventSink;
use super::stats::{ExportStats, ExportStatsSnapshot};
use crate::config::PipelineConfig;
use crate::models::Event;
use crate::sync::lock;

/// Outcome of the final shutdown flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlushReport {
    /// Priority events accepted by the sink.
    pub priority_exported: u64,
    /// Priority events the sink refused.
    pub priority_failed: u64,
    /// Normal-lane batches accepted by the sink.
    pub batches_exported: u64,
    /// Normal-lane batches the sink refused.
    pub batches_failed: u64,
    /// Events inside accepted batches.
    pub events_exported: u64,
    /// Events inside refused batches.
    pub events_failed: u64,
}

struct Lanes {
    sink: Arc<dyn EventSink>,
    max_batch_size: usize,
    max_queue_size: usize,
    auto_flush_size: usize,
    flush_interval: Duration,
    batch_retry: RetryPolicy,
    priority_retry: RetryPolicy,
    normal: Mutex<VecDeque<Event>>,
    priority: Mutex<VecDeque<Event>>,
    /// Batch a normal-lane worker is exporting or waiting to retry.
    batch_in_flight: Mutex<Option<Vec<Event>>>,
    /// Event the priority worker is exporting or waiting to retry.
    priority_in_flight: Mutex<Option<Event>>,
    normal_ready: Notify,
    priority_ready: Notify,
    accepting: AtomicBool,
    stats: ExportStats,
}

impl Lanes {
    /// Pushes onto a lane and trims it to `max_queue_size`.
    ///
    /// Returns the lane length and the number of dropped events.
    fn enqueue(&self, lane: &Mutex<VecDeque<Event>>, event: Event) -> (usize, usize) {
        let mut queue = lock(lane);
        queue.push_back(event);
        let excess = queue.len().saturating_sub(self.max_queue_size);
        queue.drain(..excess);
        (queue.len(), excess)
    }

    fn normal_len(&self) -> usize {
        lock(&self.normal).len()
    }

    fn cut_batch(&self) -> Vec<Event> {
        let mut queue = lock(&self.normal);
        let size = queue.len().min(self.max_batch_size);
        queue.drain(..size).collect()
    }

    /// Pops the next priority event and marks it in flight.
    fn next_priority(&self) -> Option<Event> {
        let event = lock(&self.priority).pop_front()?;
        *lock(&self.priority_in_flight) = Some(event.clone());
        Some(event)
    }

    /// Exports one batch, then keeps going while the size trigger still holds.
    async fn flush_cycle(&self) {
        let mut batch = self.cut_batch();
        while !batch.is_empty() {
            self.export_batch(batch).await;
            if self.normal_len() < self.auto_flush_size {
                break;
            }
            batch = self.cut_batch();
        }
    }

    async fn export_batch(&self, batch: Vec<Event>) {
        let size = batch.len();
        let sink = self.sink.as_ref();
        let events = batch.as_slice();

        *lock(&self.batch_in_flight) = Some(batch.clone());
        let outcome = self.batch_retry.run(|| sink.export(events)).await;
        // Cleared in the same poll that records the outcome.
        *lock(&self.batch_in_flight) = None;

        match outcome {
            Ok(()) => {
                self.stats.batch_exported(size);
                tracing::debug!(batch_size = size, "Exported batch");
            }
            Err(error) => {
                self.stats.batch_failed(size);
                tracing::warn!(
                    batch_size = size,
                    attempts = self.batch_retry.max_attempts,
                    %error,
                    "Discarding batch after exhausting export retries"
                );
            }
        }
    }

    async fn export_priority(&self, event: Event) {
        let sink = self.sink.as_ref();
        let single = &event;

        let outcome = self.priority_retry.run(|| sink.export_one(single)).await;
        *lock(&self.priority_in_flight) = None;

        match outcome {
            Ok(()) => {
                self.stats.priority_exported();
                tracing::debug!(event = %event.name, "Exported priority event");
            }
            Err(error) => {
                self.stats.priority_failed();
                tracing::warn!(
                    event = %event.name,
                    attempts = self.priority_retry.max_attempts,
                    %error,
                    "Discarding priority event after exhausting export retries"
                );
            }
        }
    }
}

/// Accumulates kept events and hands them to the sink.
pub struct BatchScheduler {
    lanes: Arc<Lanes>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("max_batch_size", &self.lanes.max_batch_size)
            .field("max_queue_size", &self.lanes.max_queue_size)
            .field("normal_queued", &self.queued())
            .field("priority_queued", &self.priority_queued())
            .field("sink", &"<dyn EventSink>")
            .finish_non_exhaustive()
    }
}

impl BatchScheduler {
    /// Creates a scheduler exporting to `sink`. Call [`BatchScheduler::start`]
    /// to begin exporting.
    #[must_use]
    pub fn new(config: &PipelineConfig, sink: Arc<dyn EventSink>) -> Self {
        let lanes = Lanes {
            sink,
            max_batch_size: config.max_batch_size.max(1),
            max_queue_size: config.max_queue_size.max(1),
            auto_flush_size: config.auto_flush_size(),
            flush_interval: config.flush_interval(),
            batch_retry: RetryPolicy::batch_lane(config.retry_base_delay()),
            priority_retry: RetryPolicy::priority_lane(),
            normal: Mutex::new(VecDeque::new()),
            priority: Mutex::new(VecDeque::new()),
            batch_in_flight: Mutex::new(None),
            priority_in_flight: Mutex::new(None),
            normal_ready: Notify::new(),
            priority_ready: Notify::new(),
            accepting: AtomicBool::new(true),
            stats: ExportStats::default(),
        };

        Self {
            lanes: Arc::new(lanes),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the lane workers on the current tokio runtime.
    ///
    /// Calling it again, or after [`BatchScheduler::flush`], does nothing.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) {
        let mut workers = lock(&self.workers);
        if !workers.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        workers.push(tokio::spawn(run_normal_lane(
            self.lanes.clone(),
            self.cancel.clone(),
        )));
        workers.push(tokio::spawn(run_priority_lane(
            self.lanes.clone(),
            self.cancel.clone(),
        )));

        tracing::debug!(
            flush_interval_ms = u64::try_from(self.lanes.flush_interval.as_millis()).unwrap_or(u64::MAX),
            max_batch_size = self.lanes.max_batch_size,
            auto_flush_size = self.lanes.auto_flush_size,
            "Batch scheduler started"
        );
    }

    /// Queues an event on the normal lane.
    ///
    /// Returns false if the scheduler no longer accepts events.
    pub fn submit(&self, event: Event) -> bool {
        if !self.lanes.accepting.load(Ordering::Acquire) {
            self.lanes.stats.rejected();
            return false;
        }

        let (queued, dropped) = self.lanes.enqueue(&self.lanes.normal, event);
        if dropped > 0 {
            self.lanes.stats.overflow(dropped);
            tracing::warn!(dropped, queued, "Normal lane full, dropped oldest events");
        }
        if queued >= self.lanes.auto_flush_size {
            self.lanes.normal_ready.notify_one();
        }
        true
    }

    /// Queues an event on the priority lane.
    ///
    /// Returns false if the scheduler no longer accepts events.
    pub fn submit_high_priority(&self, event: Event) -> bool {
        if !self.lanes.accepting.load(Ordering::Acquire) {
            self.lanes.stats.rejected();
            return false;
        }

        let (queued, dropped) = self.lanes.enqueue(&self.lanes.priority, event);
        if dropped > 0 {
            self.lanes.stats.priority_overflow(dropped);
            tracing::warn!(dropped, queued, "Priority lane full, dropped oldest events");
        }
        self.lanes.priority_ready.notify_one();
        true
    }

    /// Stops the scheduler and makes one best-effort export of everything
    /// still queued.
    ///
    /// Work a worker was still exporting or retrying goes first, ahead of the
    /// queues. Each event or batch gets a single attempt and whatever fails is
    /// discarded. Afterwards the scheduler rejects new events.
    pub async fn flush(&self) -> FlushReport {
        self.lanes.accepting.store(false, Ordering::Release);
        self.cancel.cancel();

        let workers = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            worker.abort();
            // A cancelled JoinError is the expected outcome here.
            let _ = worker.await;
        }

        let interrupted_event = lock(&self.lanes.priority_in_flight).take();
        let interrupted_batch = lock(&self.lanes.batch_in_flight).take();
        if interrupted_event.is_some() || interrupted_batch.is_some() {
            tracing::debug!(
                priority_event = interrupted_event.is_some(),
                batch_size = interrupted_batch.as_ref().map_or(0, Vec::len),
                "Re-exporting work interrupted by shutdown"
            );
        }

        let mut priority: Vec<Event> = interrupted_event.into_iter().collect();
        priority.extend(lock(&self.lanes.priority).drain(..));
        let normal: Vec<Event> = lock(&self.lanes.normal).drain(..).collect();
        let sink = self.lanes.sink.as_ref();
        let stats = &self.lanes.stats;
        let mut report = FlushReport::default();

        for event in &priority {
            match sink.export_one(event).await {
                Ok(()) => {
                    stats.priority_exported();
                    report.priority_exported += 1;
                }
                Err(error) => {
                    stats.priority_failed();
                    report.priority_failed += 1;
                    tracing::warn!(event = %event.name, %error, "Final flush dropped priority event");
                }
            }
        }

        let batches = interrupted_batch
            .iter()
            .map(Vec::as_slice)
            .chain(normal.chunks(self.lanes.max_batch_size));
        for batch in batches {
            match sink.export(batch).await {
                Ok(()) => {
                    stats.batch_exported(batch.len());
                    report.batches_exported += 1;
                    report.events_exported += batch.len() as u64;
                }
                Err(error) => {
                    stats.batch_failed(batch.len());
                    report.batches_failed += 1;
                    report.events_failed += batch.len() as u64;
                    tracing::warn!(batch_size = batch.len(), %error, "Final flush dropped batch");
                }
            }
        }

        tracing::info!(
            priority_exported = report.priority_exported,
            batches_exported = report.batches_exported,
            events_exported = report.events_exported,
            events_failed = report.events_failed + report.priority_failed,
            "Batch scheduler flushed"
        );
        report
    }

    /// Events waiting on the normal lane.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.lanes.normal_len()
    }

    /// Events waiting on the priority lane.
    #[must_use]
    pub fn priority_queued(&self) -> usize {
        lock(&self.lanes.priority).len()
    }

    /// Returns true until [`BatchScheduler::flush`] has been called.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.lanes.accepting.load(Ordering::Acquire)
    }

    /// Copies the export counters.
    #[must_use]
    pub fn stats(&self) -> ExportStatsSnapshot {
        self.lanes.stats.snapshot()
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_normal_lane(lanes: Arc<Lanes>, cancel: CancellationToken) {
    // `interval_at` panics on a zero period.
    let period = lanes.flush_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => lanes.flush_cycle().await,
            () = lanes.normal_ready.notified() => lanes.flush_cycle().await,
        }
    }
    tracing::debug!("Normal lane worker stopped");
}

async fn run_priority_lane(lanes: Arc<Lanes>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match lanes.next_priority() {
            Some(event) => lanes.export_priority(event).await,
            None => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = lanes.priority_ready.notified() => {}
                }
            }
        }
    }
    tracing::debug!("Priority lane worker stopped");
}
