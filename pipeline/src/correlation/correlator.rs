//! The request correlator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bounded::BoundedMap;
use crate::config::PipelineConfig;
use crate::models::{Event, LiveStats, RequestContext, RequestStatus};
use crate::sync::lock;

/// Buffered events per live request stream before slow receivers lag.
pub const EVENT_STREAM_CAPACITY: usize = 256;

/// Errors returned when admitting a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// The context has an empty correlation id.
    #[error("Correlation id must not be empty")]
    EmptyId,

    /// A live request already uses this correlation id.
    #[error("Request '{0}' is already active")]
    AlreadyActive(String),

    /// The correlator has been shut down.
    #[error("Correlator is shut down")]
    Closed,
}

/// Handle returned for an admitted request.
#[derive(Debug)]
pub struct RequestHandle {
    /// Correlation id of the request.
    pub correlation_id: String,

    /// Stream of the events added to the request. Yields `Closed` once the
    /// request has ended.
    pub events: broadcast::Receiver<Event>,
}

#[derive(Debug)]
struct LiveRequest {
    context: RequestContext,
    started: Instant,
    generation: u64,
    stream: broadcast::Sender<Event>,
    timer: CancellationToken,
}

impl LiveRequest {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy)]
struct Retained {
    stats: LiveStats,
    completed: Instant,
}

#[derive(Debug)]
struct CorrelationState {
    live: HashMap<String, LiveRequest>,
    retained: BoundedMap<String, Retained>,
    next_generation: u64,
    accepting: bool,
}

#[derive(Debug)]
struct Inner {
    timeout: Duration,
    retention: Duration,
    capacity: usize,
    shutdown: CancellationToken,
    state: Mutex<CorrelationState>,
}

impl Inner {
    /// Ends a live request, keeping its final stats for the retention period.
    fn finish(
        state: &mut CorrelationState,
        id: &str,
        status: RequestStatus,
    ) -> Option<LiveStats> {
        let request = state.live.remove(id)?;
        request.timer.cancel();

        let mut stats = request.context.live_stats;
        stats.duration_ms = request.elapsed_ms();
        stats.status = status;

        state.retained.insert(
            id.to_string(),
            Retained {
                stats,
                completed: Instant::now(),
            },
        );
        tracing::debug!(
            correlation_id = %id,
            %status,
            events = stats.total(),
            duration_ms = stats.duration_ms,
            "Request ended"
        );
        // Dropping `request` drops the sender and closes the stream.
        Some(stats)
    }

    fn time_out(&self, id: &str, generation: u64) {
        let mut state = lock(&self.state);
        let current = state
            .live
            .get(id)
            .is_some_and(|request| request.generation == generation);
        if current && Self::finish(&mut state, id, RequestStatus::TimedOut).is_some() {
            tracing::info!(correlation_id = %id, "Request timed out");
        }
    }
}

/// Groups events by correlation id while requests are live.
///
/// Cloning is cheap; clones share state.
///
/// # Example
///
/// ```
/// use pipeline::config::PipelineConfig;
/// use pipeline::correlation::RequestCorrelator;
/// use pipeline::models::{Event, RequestContext, SignalKind, RequestStatus};
///
/// # tokio_test::block_on(async {
/// let correlator = RequestCorrelator::new(&PipelineConfig::default());
/// let handle = correlator.request_start(RequestContext::with_correlation_id("req-1")).unwrap();
///
/// correlator.add_event("req-1", &Event::new("db.query"));
/// correlator.add_event("req-1", &Event::new("rows").with_kind(SignalKind::Metric));
/// correlator.request_end("req-1");
///
/// let stats = correlator.get_stats(&handle.correlation_id).unwrap();
/// assert_eq!(stats.span_count, 1);
/// assert_eq!(stats.metric_count, 1);
/// assert_eq!(stats.status, RequestStatus::Completed);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RequestCorrelator {
    inner: Arc<Inner>,
}

impl RequestCorrelator {
    /// Creates a correlator from the pipeline configuration.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let capacity = config.max_concurrent_requests.max(1);
        let state = CorrelationState {
            live: HashMap::with_capacity(capacity),
            retained: BoundedMap::new(capacity),
            next_generation: 0,
            accepting: true,
        };

        Self {
            inner: Arc::new(Inner {
                timeout: config.request_timeout(),
                retention: config.stats_retention(),
                capacity,
                shutdown: CancellationToken::new(),
                state: Mutex::new(state),
            }),
        }
    }

    /// Admits a request and arms its timeout.
    ///
    /// At capacity the oldest live request is ended with status `Evicted`
    /// first. The timeout needs a tokio runtime; without one the request only
    /// ends explicitly or by eviction.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, already live, or the correlator
    /// is shut down.
    pub fn request_start(&self, context: RequestContext) -> Result<RequestHandle, CorrelationError> {
        let id = context.correlation_id.trim().to_string();
        if id.is_empty() {
            return Err(CorrelationError::EmptyId);
        }

        let mut state = lock(&self.inner.state);
        if !state.accepting {
            return Err(CorrelationError::Closed);
        }
        if state.live.contains_key(&id) {
            return Err(CorrelationError::AlreadyActive(id));
        }

        if state.live.len() >= self.inner.capacity {
            let oldest = state
                .live
                .iter()
                .min_by_key(|(_, request)| (request.started, request.generation))
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                Inner::finish(&mut state, &oldest, RequestStatus::Evicted);
                tracing::warn!(
                    correlation_id = %oldest,
                    capacity = self.inner.capacity,
                    "Too many live requests, evicted oldest"
                );
            }
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        let (stream, events) = broadcast::channel(EVENT_STREAM_CAPACITY);
        let timer = self.inner.shutdown.child_token();
        self.arm_timeout(&id, generation, timer.clone());

        // A restarted id must not report the stats of its previous run.
        state.retained.remove(&id);

        let mut context = context;
        context.correlation_id.clone_from(&id);
        context.live_stats = LiveStats::default();
        state.live.insert(
            id.clone(),
            LiveRequest {
                context,
                started: Instant::now(),
                generation,
                stream,
                timer,
            },
        );
        tracing::debug!(correlation_id = %id, live = state.live.len(), "Request started");

        Ok(RequestHandle {
            correlation_id: id,
            events,
        })
    }

    /// Adds an event to a live request.
    ///
    /// Returns false if no live request has this id.
    pub fn add_event(&self, correlation_id: &str, event: &Event) -> bool {
        let mut state = lock(&self.inner.state);
        let Some(request) = state.live.get_mut(correlation_id.trim()) else {
            return false;
        };

        request.context.live_stats.record(event.kind);
        request.context.live_stats.duration_ms = request.elapsed_ms();
        // No receiver listening is fine; the stats are still updated.
        let _ = request.stream.send(event.clone());
        true
    }

    /// Ends a live request.
    ///
    /// Returns false if no live request has this id.
    pub fn request_end(&self, correlation_id: &str) -> bool {
        let mut state = lock(&self.inner.state);
        Inner::finish(&mut state, correlation_id.trim(), RequestStatus::Completed).is_some()
    }

    /// Stats of a live or recently ended request.
    ///
    /// The duration of a live request is measured at the time of the call.
    /// Returns `None` for unknown ids and once the retention period of an
    /// ended request has passed.
    #[must_use]
    pub fn get_stats(&self, correlation_id: &str) -> Option<LiveStats> {
        let correlation_id = correlation_id.trim();
        let mut state = lock(&self.inner.state);
        if let Some(request) = state.live.get(correlation_id) {
            let mut stats = request.context.live_stats;
            stats.duration_ms = request.elapsed_ms();
            return Some(stats);
        }

        let key = correlation_id.to_string();
        let retained = *state.retained.get(&key)?;
        if retained.completed.elapsed() >= self.inner.retention {
            state.retained.remove(&key);
            return None;
        }
        Some(retained.stats)
    }

    /// Context of a live request.
    #[must_use]
    pub fn context(&self, correlation_id: &str) -> Option<RequestContext> {
        lock(&self.inner.state)
            .live
            .get(correlation_id.trim())
            .map(|request| {
                let mut context = request.context.clone();
                context.live_stats.duration_ms = request.elapsed_ms();
                context
            })
    }

    /// Drops ended requests whose retention period has passed.
    ///
    /// Returns the number of dropped entries.
    pub fn purge_expired(&self) -> usize {
        let retention = self.inner.retention;
        let mut state = lock(&self.inner.state);
        let before = state.retained.len();
        state
            .retained
            .retain(|_, retained| retained.completed.elapsed() < retention);
        let purged = before - state.retained.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired request stats");
        }
        purged
    }

    /// Number of live requests.
    #[must_use]
    pub fn live_count(&self) -> usize {
        lock(&self.inner.state).live.len()
    }

    /// Number of ended requests whose stats are still retained.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        lock(&self.inner.state).retained.len()
    }

    /// Ends every live request and refuses new ones.
    ///
    /// Returns the number of requests ended.
    pub fn shutdown(&self) -> usize {
        let mut state = lock(&self.inner.state);
        state.accepting = false;
        let ids: Vec<String> = state.live.keys().cloned().collect();
        for id in &ids {
            Inner::finish(&mut state, id, RequestStatus::Completed);
        }
        drop(state);

        self.inner.shutdown.cancel();
        if !ids.is_empty() {
            tracing::info!(ended = ids.len(), "Correlator shut down");
        }
        ids.len()
    }

    fn arm_timeout(&self, id: &str, generation: u64, timer: CancellationToken) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(correlation_id = %id, "No runtime, request timeout not armed");
            return;
        };

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.timeout;
        let id = id.to_string();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.time_out(&id, generation);
                    }
                }
            }
        });
    }
}
