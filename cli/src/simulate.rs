//! Synthetic workload driver.
//!
//! Pushes generated events through a started pipeline, triggers one rapid
//! loop and one call cycle on purpose, then shuts the pipeline down and
//! summarizes what happened.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use clap::Args;
use pipeline::config::PipelineConfig;
use pipeline::export::{EventSink, FlushReport, InMemorySink, SinkError};
use pipeline::loops::{CircuitState, DetectedPattern};
use pipeline::models::{Event, RequestContext, SignalKind};
use pipeline::{PipelineStats, TelemetryPipeline};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

/// Operation hammered in a tight loop to trip the rapid-execution detector.
const STORM_OPERATION: &str = "sim.retry_storm";

/// Operations invoked as A, B, C, A to trip the cycle detector.
const CYCLE_OPERATIONS: [&str; 4] = ["sim.cycle.a", "sim.cycle.b", "sim.cycle.c", "sim.cycle.a"];

/// Options of the `simulate` command.
#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Number of events to submit
    #[arg(long, default_value_t = 1_000)]
    pub events: usize,

    /// Number of distinct operation names
    #[arg(long, default_value_t = 8)]
    pub operations: usize,

    /// Probability that an event is flagged as an error
    #[arg(long, default_value_t = 0.02)]
    pub error_rate: f64,

    /// Number of correlated requests the events are spread over
    #[arg(long, default_value_t = 5)]
    pub requests: usize,

    /// Write exported events to stdout as JSON lines
    #[arg(long)]
    pub print: bool,

    /// Seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,
}

/// What a simulation run produced.
#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    /// Pipeline statistics after shutdown.
    pub stats: PipelineStats,
    /// Outcome of the final flush.
    pub flush: FlushReport,
    /// Loop patterns detected during the run.
    pub patterns: Vec<DetectedPattern>,
    /// Operations whose breaker was open when the workload finished.
    pub blocked_operations: Vec<String>,
}

/// Sink writing every exported event to stdout as one JSON line.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    fn write_lines<'a>(events: impl IntoIterator<Item = &'a Event>) -> Result<(), SinkError> {
        let mut out = std::io::stdout().lock();
        for event in events {
            let line =
                serde_json::to_string(event).map_err(|e| SinkError::Rejected(e.to_string()))?;
            writeln!(out, "{line}").map_err(|e| SinkError::Unavailable(e.to_string()))?;
        }
        out.flush().map_err(|e| SinkError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl EventSink for StdoutSink {
    async fn export(&self, batch: &[Event]) -> Result<(), SinkError> {
        Self::write_lines(batch)
    }

    async fn export_one(&self, event: &Event) -> Result<(), SinkError> {
        Self::write_lines([event])
    }
}

/// Runs the workload described by `args` through a fresh pipeline.
///
/// # Errors
///
/// Returns an error if the arguments or the configuration are invalid.
pub async fn run(config: PipelineConfig, args: &SimulateArgs) -> Result<SimulationSummary> {
    ensure!(args.operations > 0, "--operations must be at least 1");
    ensure!(
        (0.0..=1.0).contains(&args.error_rate),
        "--error-rate must be between 0 and 1"
    );

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let sink: Arc<dyn EventSink> = if args.print {
        Arc::new(StdoutSink)
    } else {
        InMemorySink::new_shared()
    };
    let telemetry = TelemetryPipeline::with_rng(config, sink, StdRng::seed_from_u64(rng.gen()))?;
    telemetry.start();

    let request_ids: Vec<String> = (0..args.requests).map(|i| format!("sim-req-{i}")).collect();
    for id in &request_ids {
        telemetry.request_start(RequestContext::with_correlation_id(id.as_str()))?;
    }

    let kinds = [SignalKind::Span, SignalKind::Metric, SignalKind::Log];
    for i in 0..args.events {
        let mut event = Event::new(format!("sim.op.{}", i % args.operations))
            .with_kind(kinds[i % kinds.len()])
            .with_attribute("duration.ms", rng.gen_range(1.0..50.0));
        if rng.gen_bool(args.error_rate) {
            event = event.with_attribute("error", true);
        }
        if i % 100 == 99 {
            event = event.with_attribute("duration.ms", 1_500.0);
        }
        if !request_ids.is_empty() {
            event = event.with_correlation_id(request_ids[i % request_ids.len()].as_str());
        }
        telemetry.submit(event)?;

        if i % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }

    telemetry.submit_high_priority(
        Event::new("sim.alert").with_attribute("message", "simulated paging event"),
    )?;

    for _ in 0..15 {
        telemetry.execute_guarded(STORM_OPERATION, || ());
    }
    for name in CYCLE_OPERATIONS {
        telemetry.execute_guarded(name, || ());
    }

    let blocked_operations: Vec<String> = [STORM_OPERATION]
        .into_iter()
        .chain(CYCLE_OPERATIONS)
        .filter(|name| telemetry.circuit_state(name) == CircuitState::Open)
        .map(str::to_string)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    for id in &request_ids {
        telemetry.request_end(id);
    }

    let patterns = telemetry.recent_patterns();
    let flush = telemetry.shutdown().await;
    tracing::info!(
        patterns = patterns.len(),
        blocked = blocked_operations.len(),
        "Simulation finished"
    );

    Ok(SimulationSummary {
        stats: telemetry.stats(),
        flush,
        patterns,
        blocked_operations,
    })
}
