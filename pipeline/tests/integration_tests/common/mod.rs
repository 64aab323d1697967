//! Common test utilities and helpers for integration tests.

use pipeline::config::{Environment, PipelineConfig};
use pipeline::export::InMemorySink;
use pipeline::TelemetryPipeline;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Creates a started pipeline backed by a fresh in-memory sink.
///
/// Must be called from within a tokio runtime.
pub fn started_pipeline(config: PipelineConfig) -> (TelemetryPipeline, Arc<InMemorySink>) {
    let sink = InMemorySink::new_shared();
    let telemetry = TelemetryPipeline::with_rng(config, sink.clone(), StdRng::seed_from_u64(11))
        .expect("test configuration must be valid");
    telemetry.start();
    (telemetry, sink)
}

/// A configuration whose adaptive rate is always 1, so only the budget
/// limits adaptive keeps.
pub fn keep_all_config() -> PipelineConfig {
    PipelineConfig {
        environment: Environment::Development,
        base_rate: 1.0,
        min_rate: 1.0,
        max_rate: 1.0,
        ..PipelineConfig::default()
    }
}

/// Names of every event exported in batches, in export order.
pub fn exported_names(sink: &InMemorySink) -> Vec<String> {
    sink.batches()
        .iter()
        .flatten()
        .map(|event| event.name.clone())
        .collect()
}
