//! The telemetry pipeline façade.
//!
//! [`TelemetryPipeline`] owns one instance of every component plus the
//! periodic timers that drive them. Several pipelines can coexist in one
//! process; nothing is global.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, PipelineConfig};
use crate::correlation::{CorrelationError, RequestCorrelator, RequestHandle};
use crate::export::{BatchScheduler, EventSink, ExportStatsSnapshot, FlushReport};
use crate::loops::{CircuitState, DetectedPattern, LoopDetector};
use crate::models::{
    Event, EventValidationError, ExecutionRecord, LiveStats, Priority, RequestContext,
};
use crate::sampling::{SamplingDecision, SamplingEngine, SamplingStatsSnapshot};
use crate::sync::lock;

/// Errors returned to producers.
#[derive(Debug, Error)]
pub enum IngressError {
    /// The event failed validation.
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] EventValidationError),

    /// The execution record has no operation name.
    #[error("Execution record has no operation name")]
    InvalidExecution,

    /// The pipeline has been shut down.
    #[error("Pipeline is shut down")]
    Closed,
}

/// Point-in-time statistics of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Sampling decisions by reason.
    pub sampling: SamplingStatsSnapshot,
    /// Export outcomes.
    pub export: ExportStatsSnapshot,
    /// Budget left in the current refill window.
    pub budget_remaining: u32,
    /// Events waiting on the normal lane.
    pub normal_queued: usize,
    /// Events waiting on the priority lane.
    pub priority_queued: usize,
    /// Breakers currently open.
    pub open_breakers: usize,
    /// Live correlated requests.
    pub live_requests: usize,
    /// Ended requests whose stats are still retained.
    pub retained_requests: usize,
}

/// An adaptive, bounded telemetry pipeline.
///
/// # Example
///
/// ```
/// use pipeline::config::PipelineConfig;
/// use pipeline::export::InMemorySink;
/// use pipeline::models::Event;
/// use pipeline::TelemetryPipeline;
///
/// # tokio_test::block_on(async {
/// let sink = InMemorySink::new_shared();
/// let pipeline = TelemetryPipeline::new(PipelineConfig::default(), sink.clone()).unwrap();
/// pipeline.start();
///
/// let decision = pipeline.submit(Event::new("checkout").with_attribute("error", true)).unwrap();
/// assert!(decision.kept);
///
/// let report = pipeline.shutdown().await;
/// assert_eq!(report.events_exported, 1);
/// assert_eq!(sink.exported_event_count(), 1);
/// # });
/// ```
pub struct TelemetryPipeline {
    config: PipelineConfig,
    sampler: Arc<SamplingEngine>,
    scheduler: BatchScheduler,
    detector: Arc<LoopDetector>,
    correlator: RequestCorrelator,
    cancel: CancellationToken,
    timers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for TelemetryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryPipeline")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl TelemetryPipeline {
    /// Creates a pipeline exporting to `sink`.
    ///
    /// Nothing runs until [`TelemetryPipeline::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: PipelineConfig, sink: Arc<dyn EventSink>) -> Result<Self, ConfigError> {
        config.validate_config()?;
        let sampler = SamplingEngine::new(&config);
        Ok(Self::assemble(config, sink, sampler))
    }

    /// Like [`TelemetryPipeline::new`] with a fixed sampling generator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_rng(
        config: PipelineConfig,
        sink: Arc<dyn EventSink>,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate_config()?;
        let sampler = SamplingEngine::with_rng(&config, rng);
        Ok(Self::assemble(config, sink, sampler))
    }

    fn assemble(config: PipelineConfig, sink: Arc<dyn EventSink>, sampler: SamplingEngine) -> Self {
        Self {
            scheduler: BatchScheduler::new(&config, sink),
            detector: Arc::new(LoopDetector::new(&config)),
            correlator: RequestCorrelator::new(&config),
            sampler: Arc::new(sampler),
            cancel: CancellationToken::new(),
            timers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Starts the export workers and the periodic timers.
    ///
    /// Calling it again, or after shutdown, does nothing.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) {
        let mut timers = lock(&self.timers);
        if !timers.is_empty() || self.is_closed() {
            return;
        }

        self.scheduler.start();

        let sampler = Arc::clone(&self.sampler);
        timers.push(self.spawn_timer(
            "budget_refill",
            self.config.budget_refill_interval(),
            move || sampler.refill_budget(),
        ));

        let detector = Arc::clone(&self.detector);
        timers.push(self.spawn_timer(
            "breaker_sweep",
            self.config.breaker_sweep_interval(),
            move || {
                detector.sweep_breakers();
            },
        ));

        let correlator = self.correlator.clone();
        timers.push(self.spawn_timer(
            "correlation_purge",
            self.config.stats_retention().max(Duration::from_secs(1)),
            move || {
                correlator.purge_expired();
            },
        ));

        tracing::info!(
            environment = %self.config.environment,
            base_rate = self.config.base_rate,
            budget_per_minute = self.config.budget_per_minute,
            max_batch_size = self.config.max_batch_size,
            "Telemetry pipeline started"
        );
    }

    /// Samples an event and queues it for export if kept.
    ///
    /// Events carrying a correlation id are counted by their request whether
    /// or not they are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is invalid or the pipeline is shut down.
    pub fn submit(&self, event: Event) -> Result<SamplingDecision, IngressError> {
        self.ensure_open()?;
        event.validate_event()?;
        self.tap(&event);

        let decision = self.sampler.decide(&event);
        if decision.kept && !self.scheduler.submit(event) {
            return Err(IngressError::Closed);
        }
        Ok(decision)
    }

    /// Queues an event on the priority lane, bypassing sampling.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is invalid or the pipeline is shut down.
    pub fn submit_high_priority(&self, event: Event) -> Result<(), IngressError> {
        self.ensure_open()?;
        event.validate_event()?;
        self.tap(&event);

        if self
            .scheduler
            .submit_high_priority(event.with_priority(Priority::High))
        {
            Ok(())
        } else {
            Err(IngressError::Closed)
        }
    }

    /// Feeds an execution record to the loop detector.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no operation name or the pipeline
    /// is shut down.
    pub fn record_execution(
        &self,
        record: &ExecutionRecord,
    ) -> Result<Vec<DetectedPattern>, IngressError> {
        self.ensure_open()?;
        if !record.has_operation_name() {
            return Err(IngressError::InvalidExecution);
        }
        Ok(self.detector.record_execution(record))
    }

    /// Records an execution of `name`, filling in the execution metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is blank or the pipeline is shut down.
    pub fn track_execution(
        &self,
        name: &str,
        duration_ms: f64,
    ) -> Result<(ExecutionRecord, Vec<DetectedPattern>), IngressError> {
        self.ensure_open()?;
        if name.trim().is_empty() {
            return Err(IngressError::InvalidExecution);
        }
        Ok(self.detector.track_execution(name, duration_ms))
    }

    /// Runs `operation` unless its breaker is open, and records the execution.
    pub fn execute_guarded<T, F>(&self, name: &str, operation: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        self.detector.execute_guarded(name, operation)
    }

    /// Returns false while the breaker of `name` is open.
    pub fn should_execute(&self, name: &str) -> bool {
        self.detector.should_execute(name)
    }

    /// Current breaker state of `name`.
    #[must_use]
    pub fn circuit_state(&self, name: &str) -> CircuitState {
        self.detector.circuit_state(name)
    }

    /// Most recently detected loop patterns.
    #[must_use]
    pub fn recent_patterns(&self) -> Vec<DetectedPattern> {
        self.detector.recent_patterns()
    }

    /// Admits a correlated request.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, already live, or the pipeline is
    /// shut down.
    pub fn request_start(&self, context: RequestContext) -> Result<RequestHandle, CorrelationError> {
        self.correlator.request_start(context)
    }

    /// Adds an event to a live request without sampling or exporting it.
    pub fn add_event(&self, correlation_id: &str, event: &Event) -> bool {
        self.correlator.add_event(correlation_id, event)
    }

    /// Ends a live request.
    pub fn request_end(&self, correlation_id: &str) -> bool {
        self.correlator.request_end(correlation_id)
    }

    /// Stats of a live or recently ended request.
    #[must_use]
    pub fn get_stats(&self, correlation_id: &str) -> Option<LiveStats> {
        self.correlator.get_stats(correlation_id)
    }

    /// Current adaptive keep-rate of `name`.
    #[must_use]
    pub fn adaptive_rate(&self, name: &str) -> f64 {
        self.sampler.adaptive_rate(name)
    }

    /// Collects statistics from every component.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            sampling: self.sampler.stats(),
            export: self.scheduler.stats(),
            budget_remaining: self.sampler.budget().remaining(),
            normal_queued: self.scheduler.queued(),
            priority_queued: self.scheduler.priority_queued(),
            open_breakers: self.detector.open_breakers(),
            live_requests: self.correlator.live_count(),
            retained_requests: self.correlator.retained_count(),
        }
    }

    /// The configuration this pipeline was built with.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns true once [`TelemetryPipeline::shutdown`] has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flushes once, then stops every timer and ends all live requests.
    ///
    /// The flush is a single best-effort pass; anything the sink refuses is
    /// lost. Submissions are rejected from the moment this is called.
    pub async fn shutdown(&self) -> FlushReport {
        self.closed.store(true, Ordering::Release);
        let report = self.scheduler.flush().await;

        self.cancel.cancel();
        let timers = std::mem::take(&mut *lock(&self.timers));
        for timer in timers {
            // Timers exit on cancellation; a join error only means it was aborted.
            let _ = timer.await;
        }
        let ended = self.correlator.shutdown();

        tracing::info!(
            events_exported = report.events_exported + report.priority_exported,
            events_lost = report.events_failed + report.priority_failed,
            requests_ended = ended,
            "Telemetry pipeline shut down"
        );
        report
    }

    fn ensure_open(&self) -> Result<(), IngressError> {
        if self.is_closed() {
            Err(IngressError::Closed)
        } else {
            Ok(())
        }
    }

    fn tap(&self, event: &Event) {
        if let Some(id) = event.correlation_id() {
            if !self.correlator.add_event(id, event) {
                tracing::trace!(correlation_id = %id, event = %event.name, "No live request for event");
            }
        }
    }

    fn spawn_timer<F>(&self, name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => tick(),
                }
            }
            tracing::debug!(timer = name, "Timer stopped");
        })
    }
}

impl Drop for TelemetryPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
