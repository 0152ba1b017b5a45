//! Engine configuration
//!
//! Loaded from TOML; every field has a default so partial documents work.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use svo_model::RetryPolicy;

/// Engine-wide limits and defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parallel step dispatch limit within one run
    pub max_fan_out: usize,
    /// Fallback retry policy
    pub default_retry: RetryPolicy,
    /// Ceiling for every computed backoff delay
    pub max_backoff_ms: u64,
    /// Per-attempt adapter timeout when the step declares none
    pub default_step_timeout_ms: u64,
    /// Overall plan timeout when the plan declares none
    pub default_plan_timeout_ms: u64,
    /// Per-compensation deadline
    pub rollback_action_timeout_ms: u64,
    /// Global run concurrency limit
    pub max_concurrent_runs: usize,
    /// Runs allowed to wait for a slot
    pub max_queued_runs: usize,
    /// Deadline for the failure analyzer
    pub analysis_timeout_ms: u64,
    /// Recent interactions included in a failure payload
    pub failure_payload_interactions: usize,
    /// Logging
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML, `ConfigError::Invalid` on out-of-bounds values.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Check bounds
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_fan_out", self.max_fan_out as u64),
            ("max_concurrent_runs", self.max_concurrent_runs as u64),
            ("default_step_timeout_ms", self.default_step_timeout_ms),
            ("default_plan_timeout_ms", self.default_plan_timeout_ms),
            ("rollback_action_timeout_ms", self.rollback_action_timeout_ms),
            ("analysis_timeout_ms", self.analysis_timeout_ms),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{field} must be > 0")));
        }
        self.default_retry
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("default_retry: {e}")))
    }

    /// With fan-out limit
    #[inline]
    #[must_use]
    pub fn with_max_fan_out(mut self, max: usize) -> Self {
        self.max_fan_out = max;
        self
    }

    /// With fallback retry policy
    #[inline]
    #[must_use]
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// With backoff ceiling
    #[inline]
    #[must_use]
    pub fn with_max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// With default per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_step_timeout_ms(mut self, ms: u64) -> Self {
        self.default_step_timeout_ms = ms;
        self
    }

    /// With default plan timeout
    #[inline]
    #[must_use]
    pub fn with_plan_timeout_ms(mut self, ms: u64) -> Self {
        self.default_plan_timeout_ms = ms;
        self
    }

    /// With compensation deadline
    #[inline]
    #[must_use]
    pub fn with_rollback_action_timeout_ms(mut self, ms: u64) -> Self {
        self.rollback_action_timeout_ms = ms;
        self
    }

    /// With admission limits
    #[inline]
    #[must_use]
    pub fn with_run_limits(mut self, concurrent: usize, queued: usize) -> Self {
        self.max_concurrent_runs = concurrent;
        self.max_queued_runs = queued;
        self
    }

    /// With analyzer deadline
    #[inline]
    #[must_use]
    pub fn with_analysis_timeout_ms(mut self, ms: u64) -> Self {
        self.analysis_timeout_ms = ms;
        self
    }

    /// Backoff ceiling
    #[inline]
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Default per-attempt timeout
    #[inline]
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    /// Default plan timeout
    #[inline]
    #[must_use]
    pub fn plan_timeout(&self) -> Duration {
        Duration::from_millis(self.default_plan_timeout_ms)
    }

    /// Compensation deadline
    #[inline]
    #[must_use]
    pub fn rollback_action_timeout(&self) -> Duration {
        Duration::from_millis(self.rollback_action_timeout_ms)
    }

    /// Analyzer deadline
    #[inline]
    #[must_use]
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_fan_out: 4,
            default_retry: RetryPolicy::default(),
            max_backoff_ms: 30_000,
            default_step_timeout_ms: 30_000,
            default_plan_timeout_ms: 300_000,
            rollback_action_timeout_ms: 10_000,
            max_concurrent_runs: 16,
            max_queued_runs: 64,
            analysis_timeout_ms: 15_000,
            failure_payload_interactions: 10,
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
