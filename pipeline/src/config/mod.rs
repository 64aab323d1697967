//! Configuration module for the pipeline.
//!
//! This module contains the pipeline configuration and deployment environment settings.

pub mod environment;
pub mod pipeline;

pub use environment::{Environment, EnvironmentMultipliers, ParseEnvironmentError};
pub use pipeline::{ConfigError, PipelineConfig};
