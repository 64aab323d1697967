//! Deployment environment and its sampling multipliers.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

/// Deployment environment the pipeline runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development.
    Development,
    /// Pre-production.
    Staging,
    /// Production.
    #[default]
    Production,
}

impl Environment {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an environment name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown environment '{0}' (expected development, staging or production)")]
pub struct ParseEnvironmentError(pub String);

impl FromStr for Environment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ParseEnvironmentError(s.to_string())),
        }
    }
}

/// Sampling-rate multiplier per environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EnvironmentMultipliers {
    /// Multiplier applied in development.
    #[validate(range(min = 0.0))]
    pub development: f64,
    /// Multiplier applied in staging.
    #[validate(range(min = 0.0))]
    pub staging: f64,
    /// Multiplier applied in production.
    #[validate(range(min = 0.0))]
    pub production: f64,
}

impl EnvironmentMultipliers {
    /// Returns the multiplier for `environment`.
    #[must_use]
    pub fn for_environment(&self, environment: Environment) -> f64 {
        match environment {
            Environment::Development => self.development,
            Environment::Staging => self.staging,
            Environment::Production => self.production,
        }
    }
}

impl Default for EnvironmentMultipliers {
    /// Development keeps everything the base rate allows, production a fifth.
    fn default() -> Self {
        Self {
            development: 1.0,
            staging: 0.5,
            production: 0.2,
        }
    }
}
