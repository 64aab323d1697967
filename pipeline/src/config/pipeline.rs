//! Pipeline configuration.
//!
//! Every option has a default; `PipelineConfig::from_env` overrides them from
//! `VIGIL_*` environment variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

use super::environment::{Environment, EnvironmentMultipliers};

/// Errors that can occur while building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Raw value found in the environment.
        value: String,
    },

    /// The assembled configuration violates a constraint.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Complete configuration of a telemetry pipeline.
///
/// # Example
///
/// ```
/// use pipeline::config::PipelineConfig;
///
/// let config = PipelineConfig {
///     max_batch_size: 50,
///     ..PipelineConfig::default()
/// };
///
/// assert!(config.validate_config().is_ok());
/// assert_eq!(config.auto_flush_size(), 40);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_cross_fields"))]
pub struct PipelineConfig {
    /// Deployment environment, selects the sampling multiplier.
    pub environment: Environment,

    /// Adaptive sampling rate before frequency damping.
    #[validate(range(min = 0.0, max = 1.0))]
    pub base_rate: f64,

    /// Lower clamp of the adaptive rate.
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_rate: f64,

    /// Upper clamp of the adaptive rate.
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_rate: f64,

    /// Decay time constant of the per-operation frequency estimate.
    #[validate(range(min = 1))]
    pub adaptive_window_ms: u64,

    /// Events slower than this are always kept.
    #[validate(range(min = 0.0))]
    pub importance_threshold_ms: f64,

    /// Adaptively kept events allowed per refill window.
    pub budget_per_minute: u32,

    /// Interval of the hard budget reset.
    #[validate(range(min = 1))]
    pub budget_refill_interval_ms: u64,

    /// Sampling multiplier per environment.
    #[validate(nested)]
    pub environment_multipliers: EnvironmentMultipliers,

    /// Normal-lane flush period.
    #[validate(range(min = 1))]
    pub flush_interval_ms: u64,

    /// Maximum events per exported batch.
    #[validate(range(min = 1))]
    pub max_batch_size: usize,

    /// Maximum queued events per lane; older events are dropped beyond it.
    #[validate(range(min = 1))]
    pub max_queue_size: usize,

    /// Fraction of `max_batch_size` that triggers an early flush.
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub auto_flush_threshold: f64,

    /// First backoff delay of normal-lane export retries.
    pub retry_base_delay_ms: u64,

    /// Executions per rapid window above which an operation is suspect.
    #[validate(range(min = 1))]
    pub rapid_execution_threshold: usize,

    /// Length of the rapid-execution window.
    #[validate(range(min = 1))]
    pub rapid_window_ms: u64,

    /// Chain length at which the cycle detector starts over.
    #[validate(range(min = 2))]
    pub cycle_chain_max_length: usize,

    /// Time an open breaker waits before becoming half-open.
    pub breaker_cooldown_ms: u64,

    /// Period of the open-breaker sweep.
    #[validate(range(min = 1))]
    pub breaker_sweep_interval_ms: u64,

    /// Requests not ended within this time are closed automatically.
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,

    /// How long final request stats stay queryable.
    pub stats_retention_ms: u64,

    /// Maximum number of live correlated requests.
    #[validate(range(min = 1))]
    pub max_concurrent_requests: usize,

    /// Maximum entries in every per-operation map.
    #[validate(range(min = 1))]
    pub max_tracked_operations: usize,
}

fn validate_cross_fields(config: &PipelineConfig) -> Result<(), ValidationError> {
    // `range` lets NaN through.
    let multipliers = &config.environment_multipliers;
    let floats = [
        config.base_rate,
        config.min_rate,
        config.max_rate,
        config.importance_threshold_ms,
        config.auto_flush_threshold,
        multipliers.development,
        multipliers.staging,
        multipliers.production,
    ];
    if floats.iter().any(|value| !value.is_finite()) {
        return Err(ValidationError::new("non_finite_value")
            .with_message("rates, thresholds and multipliers must be finite numbers".into()));
    }
    if config.min_rate > config.max_rate {
        return Err(ValidationError::new("min_rate_exceeds_max_rate")
            .with_message("min_rate must not exceed max_rate".into()));
    }
    if config.max_queue_size < config.max_batch_size {
        return Err(ValidationError::new("queue_smaller_than_batch")
            .with_message("max_queue_size must be at least max_batch_size".into()));
    }
    Ok(())
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            base_rate: 0.5,
            min_rate: 0.01,
            max_rate: 1.0,
            adaptive_window_ms: 60_000,
            importance_threshold_ms: 1_000.0,
            budget_per_minute: 1_000,
            budget_refill_interval_ms: 60_000,
            environment_multipliers: EnvironmentMultipliers::default(),
            flush_interval_ms: 5_000,
            max_batch_size: 100,
            max_queue_size: 1_000,
            auto_flush_threshold: 0.8,
            retry_base_delay_ms: 1_000,
            rapid_execution_threshold: 10,
            rapid_window_ms: 1_000,
            cycle_chain_max_length: 10,
            breaker_cooldown_ms: 30_000,
            breaker_sweep_interval_ms: 30_000,
            request_timeout_ms: 300_000,
            stats_retention_ms: 60_000,
            max_concurrent_requests: 100,
            max_tracked_operations: 1_000,
        }
    }
}

impl PipelineConfig {
    /// Builds a configuration from defaults overridden by environment variables.
    ///
    /// Each field maps to `VIGIL_<FIELD_NAME>` in upper case, e.g.
    /// `VIGIL_MAX_BATCH_SIZE`. Environment multipliers use
    /// `VIGIL_MULTIPLIER_DEVELOPMENT`, `VIGIL_MULTIPLIER_STAGING` and
    /// `VIGIL_MULTIPLIER_PRODUCTION`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the resulting
    /// configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`PipelineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_from(&lookup, "VIGIL_ENVIRONMENT", &mut config.environment)?;
        override_from(&lookup, "VIGIL_BASE_RATE", &mut config.base_rate)?;
        override_from(&lookup, "VIGIL_MIN_RATE", &mut config.min_rate)?;
        override_from(&lookup, "VIGIL_MAX_RATE", &mut config.max_rate)?;
        override_from(&lookup, "VIGIL_ADAPTIVE_WINDOW_MS", &mut config.adaptive_window_ms)?;
        override_from(
            &lookup,
            "VIGIL_IMPORTANCE_THRESHOLD_MS",
            &mut config.importance_threshold_ms,
        )?;
        override_from(&lookup, "VIGIL_BUDGET_PER_MINUTE", &mut config.budget_per_minute)?;
        override_from(
            &lookup,
            "VIGIL_BUDGET_REFILL_INTERVAL_MS",
            &mut config.budget_refill_interval_ms,
        )?;
        override_from(
            &lookup,
            "VIGIL_MULTIPLIER_DEVELOPMENT",
            &mut config.environment_multipliers.development,
        )?;
        override_from(
            &lookup,
            "VIGIL_MULTIPLIER_STAGING",
            &mut config.environment_multipliers.staging,
        )?;
        override_from(
            &lookup,
            "VIGIL_MULTIPLIER_PRODUCTION",
            &mut config.environment_multipliers.production,
        )?;
        override_from(&lookup, "VIGIL_FLUSH_INTERVAL_MS", &mut config.flush_interval_ms)?;
        override_from(&lookup, "VIGIL_MAX_BATCH_SIZE", &mut config.max_batch_size)?;
        override_from(&lookup, "VIGIL_MAX_QUEUE_SIZE", &mut config.max_queue_size)?;
        override_from(
            &lookup,
            "VIGIL_AUTO_FLUSH_THRESHOLD",
            &mut config.auto_flush_threshold,
        )?;
        override_from(
            &lookup,
            "VIGIL_RETRY_BASE_DELAY_MS",
            &mut config.retry_base_delay_ms,
        )?;
        override_from(
            &lookup,
            "VIGIL_RAPID_EXECUTION_THRESHOLD",
            &mut config.rapid_execution_threshold,
        )?;
        override_from(&lookup, "VIGIL_RAPID_WINDOW_MS", &mut config.rapid_window_ms)?;
        override_from(
            &lookup,
            "VIGIL_CYCLE_CHAIN_MAX_LENGTH",
            &mut config.cycle_chain_max_length,
        )?;
        override_from(
            &lookup,
            "VIGIL_BREAKER_COOLDOWN_MS",
            &mut config.breaker_cooldown_ms,
        )?;
        override_from(
            &lookup,
            "VIGIL_BREAKER_SWEEP_INTERVAL_MS",
            &mut config.breaker_sweep_interval_ms,
        )?;
        override_from(&lookup, "VIGIL_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms)?;
        override_from(&lookup, "VIGIL_STATS_RETENTION_MS", &mut config.stats_retention_ms)?;
        override_from(
            &lookup,
            "VIGIL_MAX_CONCURRENT_REQUESTS",
            &mut config.max_concurrent_requests,
        )?;
        override_from(
            &lookup,
            "VIGIL_MAX_TRACKED_OPERATIONS",
            &mut config.max_tracked_operations,
        )?;

        config.validate_config()?;
        Ok(config)
    }

    /// Validates ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing every violated constraint.
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()?;
        Ok(())
    }

    /// Sampling multiplier for the configured environment.
    #[must_use]
    pub fn environment_multiplier(&self) -> f64 {
        self.environment_multipliers
            .for_environment(self.environment)
    }

    /// Queue length that triggers an early normal-lane flush.
    #[must_use]
    pub fn auto_flush_size(&self) -> usize {
        // Bounded by max_batch_size, so the float round-trip is exact enough.
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let size = (self.max_batch_size as f64 * self.auto_flush_threshold).ceil() as usize;
        size.clamp(1, self.max_batch_size)
    }

    /// Normal-lane flush period.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Budget reset period.
    #[must_use]
    pub const fn budget_refill_interval(&self) -> Duration {
        Duration::from_millis(self.budget_refill_interval_ms)
    }

    /// Frequency decay time constant.
    #[must_use]
    pub const fn adaptive_window(&self) -> Duration {
        Duration::from_millis(self.adaptive_window_ms)
    }

    /// First normal-lane retry delay.
    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Rapid-execution window.
    #[must_use]
    pub const fn rapid_window(&self) -> Duration {
        Duration::from_millis(self.rapid_window_ms)
    }

    /// Open-to-half-open cooldown.
    #[must_use]
    pub const fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    /// Open-breaker sweep period.
    #[must_use]
    pub const fn breaker_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.breaker_sweep_interval_ms)
    }

    /// Request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Retention of final request stats.
    #[must_use]
    pub const fn stats_retention(&self) -> Duration {
        Duration::from_millis(self.stats_retention_ms)
    }
}

fn override_from<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(name) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
            name: name.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate_config().is_ok());
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.rapid_execution_threshold, 10);
        assert_eq!(config.cycle_chain_max_length, 10);
        assert_eq!(config.breaker_cooldown(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.stats_retention(), Duration::from_secs(60));
    }

    #[test]
    fn test_auto_flush_size() {
        let config = PipelineConfig::default();
        assert_eq!(config.auto_flush_size(), 80);

        let config = PipelineConfig {
            max_batch_size: 3,
            auto_flush_threshold: 0.5,
            ..PipelineConfig::default()
        };
        assert_eq!(config.auto_flush_size(), 2);
    }

    #[test]
    fn test_rejects_inverted_rates() {
        let config = PipelineConfig {
            min_rate: 0.9,
            max_rate: 0.1,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_queue_smaller_than_batch() {
        let config = PipelineConfig {
            max_batch_size: 50,
            max_queue_size: 10,
            ..PipelineConfig::default()
        };
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let config = PipelineConfig {
            base_rate: 1.5,
            ..PipelineConfig::default()
        };
        assert!(config.validate_config().is_err());

        let config = PipelineConfig {
            auto_flush_threshold: 0.0,
            ..PipelineConfig::default()
        };
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_rejects_non_finite_values() {
        for value in [f64::NAN, f64::INFINITY] {
            let config = PipelineConfig {
                min_rate: value,
                ..PipelineConfig::default()
            };
            assert!(config.validate_config().is_err(), "min_rate {value}");

            let config = PipelineConfig {
                importance_threshold_ms: value,
                ..PipelineConfig::default()
            };
            assert!(config.validate_config().is_err(), "threshold {value}");

            let mut config = PipelineConfig::default();
            config.environment_multipliers.production = value;
            assert!(config.validate_config().is_err(), "multiplier {value}");
        }

        let config = PipelineConfig {
            auto_flush_threshold: f64::NAN,
            ..PipelineConfig::default()
        };
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_from_lookup_rejects_nan_rate() {
        let result = PipelineConfig::from_lookup(lookup_from(&[("VIGIL_MIN_RATE", "NaN")]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = PipelineConfig::from_lookup(lookup_from(&[("VIGIL_MULTIPLIER_STAGING", "inf")]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("VIGIL_ENVIRONMENT", "staging"),
            ("VIGIL_MAX_BATCH_SIZE", "25"),
            ("VIGIL_BASE_RATE", "0.25"),
            ("VIGIL_MULTIPLIER_STAGING", "0.75"),
        ]))
        .unwrap();

        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.max_batch_size, 25);
        assert!((config.base_rate - 0.25).abs() < f64::EPSILON);
        assert!((config.environment_multiplier() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_lookup_rejects_unparsable_value() {
        let result = PipelineConfig::from_lookup(lookup_from(&[("VIGIL_MAX_QUEUE_SIZE", "lots")]));

        match result {
            Err(ConfigError::InvalidEnvVar { name, value }) => {
                assert_eq!(name, "VIGIL_MAX_QUEUE_SIZE");
                assert_eq!(value, "lots");
            }
            other => panic!("expected InvalidEnvVar, got {other:?}"),
        }
    }

    #[test]
    fn test_from_lookup_validates_result() {
        let result = PipelineConfig::from_lookup(lookup_from(&[("VIGIL_MAX_RATE", "0.001")]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_deserialization_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"max_batch_size": 10, "environment": "development"}"#)
                .unwrap();

        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.max_queue_size, 1_000);
    }
}
