//! Integration tests for loop detection and circuit breaking.

use std::time::Duration;

use pipeline::config::PipelineConfig;
use pipeline::loops::{CircuitState, PatternKind};
use pipeline::models::ExecutionRecord;

use super::common::started_pipeline;

fn hammer(telemetry: &pipeline::TelemetryPipeline, name: &str, times: usize) -> usize {
    (0..times)
        .map(|_| {
            telemetry
                .record_execution(&ExecutionRecord::new(name, 0.5))
                .unwrap()
                .len()
        })
        .sum()
}

#[tokio::test(start_paused = true)]
async fn test_rapid_execution_blocks_until_cooldown_and_sweep() {
    let (telemetry, _) = started_pipeline(PipelineConfig {
        breaker_cooldown_ms: 30_000,
        breaker_sweep_interval_ms: 40_000,
        ..PipelineConfig::default()
    });

    assert_eq!(hammer(&telemetry, "sync.poll", 11), 1);
    assert!(!telemetry.should_execute("sync.poll"));

    // Cooldown has passed but the sweep has not run yet.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(telemetry.circuit_state("sync.poll"), CircuitState::Open);
    assert!(!telemetry.should_execute("sync.poll"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(telemetry.circuit_state("sync.poll"), CircuitState::HalfOpen);
    assert!(telemetry.should_execute("sync.poll"));
    assert_eq!(telemetry.circuit_state("sync.poll"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_renewed_anomaly_reopens_breaker() {
    let (telemetry, _) = started_pipeline(PipelineConfig {
        breaker_cooldown_ms: 1_000,
        breaker_sweep_interval_ms: 1_000,
        ..PipelineConfig::default()
    });

    hammer(&telemetry, "flaky", 11);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(telemetry.circuit_state("flaky"), CircuitState::HalfOpen);

    hammer(&telemetry, "flaky", 11);
    assert_eq!(telemetry.circuit_state("flaky"), CircuitState::Open);
    assert_eq!(
        telemetry
            .recent_patterns()
            .iter()
            .filter(|p| p.kind == PatternKind::RapidExecution)
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_cycle_reported_at_second_occurrence() {
    let (telemetry, _) = started_pipeline(PipelineConfig::default());

    for name in ["A", "B", "C"] {
        assert!(telemetry
            .record_execution(&ExecutionRecord::new(name, 1.0))
            .unwrap()
            .is_empty());
    }
    let patterns = telemetry
        .record_execution(&ExecutionRecord::new("A", 1.0))
        .unwrap();

    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].kind, PatternKind::CircularDependency);
    assert_eq!(patterns[0].operations, ["A", "B", "C"]);
    assert!(!telemetry.should_execute("A"));

    // The chain was reset, so B and C alone do not form a new cycle.
    for name in ["B", "C"] {
        assert!(telemetry
            .record_execution(&ExecutionRecord::new(name, 1.0))
            .unwrap()
            .is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_execute_guarded_skips_blocked_operation() {
    let (telemetry, _) = started_pipeline(PipelineConfig::default());
    let mut runs = 0;

    for _ in 0..20 {
        telemetry.execute_guarded("render", || runs += 1);
    }

    assert_eq!(runs, 11);
    assert_eq!(telemetry.circuit_state("render"), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_track_execution_counts_invocations() {
    let (telemetry, _) = started_pipeline(PipelineConfig::default());

    let mut last = None;
    for _ in 0..3 {
        let (record, _) = telemetry.track_execution("report.build", 12.0).unwrap();
        last = Some(record);
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    let record = last.unwrap();
    assert_eq!(record.metadata.execution_count, 3);
    let since_last = record.metadata.time_since_last_execution_ms.unwrap();
    assert!((since_last - 400.0).abs() < 1e-6);
}
