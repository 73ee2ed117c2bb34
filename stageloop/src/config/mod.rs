//! Orchestrator configuration.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding `max_steps`.
pub const ENV_MAX_STEPS: &str = "STAGELOOP_MAX_STEPS";
/// Environment variable overriding `confidence_threshold`.
pub const ENV_CONFIDENCE_THRESHOLD: &str = "STAGELOOP_CONFIDENCE_THRESHOLD";
/// Environment variable overriding `per_stage_timeout_ms`.
pub const ENV_STAGE_TIMEOUT_MS: &str = "STAGELOOP_STAGE_TIMEOUT_MS";
/// Environment variable overriding `planner_timeout_ms`.
pub const ENV_PLANNER_TIMEOUT_MS: &str = "STAGELOOP_PLANNER_TIMEOUT_MS";
/// Environment variable overriding `max_retained_runs`.
pub const ENV_MAX_RETAINED_RUNS: &str = "STAGELOOP_MAX_RETAINED_RUNS";

/// Termination policy and time budgets of the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on steps per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// A successful step at or above this confidence ends the run.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Time budget of one stage invocation.
    #[serde(default = "default_stage_timeout_ms")]
    pub per_stage_timeout_ms: u64,
    /// Time budget of one planner call.
    #[serde(default = "default_planner_timeout_ms")]
    pub planner_timeout_ms: u64,
    /// Finished started runs kept in the run directory.
    #[serde(default = "default_max_retained_runs")]
    pub max_retained_runs: usize,
}

fn default_max_steps() -> usize {
    10
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_stage_timeout_ms() -> u64 {
    30_000
}

fn default_planner_timeout_ms() -> u64 {
    15_000
}

fn default_max_retained_runs() -> usize {
    1024
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            confidence_threshold: default_confidence_threshold(),
            per_stage_timeout_ms: default_stage_timeout_ms(),
            planner_timeout_ms: default_planner_timeout_ms(),
            max_retained_runs: default_max_retained_runs(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the step budget.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the confidence threshold.
    #[must_use]
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Sets the per-stage timeout.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.per_stage_timeout_ms = timeout_ms;
        self
    }

    /// Sets the planner timeout.
    #[must_use]
    pub fn with_planner_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.planner_timeout_ms = timeout_ms;
        self
    }

    /// Sets how many finished runs the run directory keeps.
    #[must_use]
    pub fn with_max_retained_runs(mut self, max_retained_runs: usize) -> Self {
        self.max_retained_runs = max_retained_runs;
        self
    }

    /// Per-stage timeout as a `Duration`.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.per_stage_timeout_ms)
    }

    /// Planner timeout as a `Duration`.
    #[must_use]
    pub fn planner_timeout(&self) -> Duration {
        Duration::from_millis(self.planner_timeout_ms)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a zero step budget, a threshold outside
    /// `[0, 1]` or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::InvalidMaxSteps);
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidThreshold(self.confidence_threshold));
        }
        if self.per_stage_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "per_stage_timeout_ms",
            });
        }
        if self.planner_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "planner_timeout_ms",
            });
        }
        Ok(())
    }

    /// Parses and validates a JSON document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON, or the validation
    /// error.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from the `STAGELOOP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Env` for an unparseable variable, or the
    /// validation error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// See [`OrchestratorConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, ENV_MAX_STEPS)? {
            config.max_steps = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_CONFIDENCE_THRESHOLD)? {
            config.confidence_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_STAGE_TIMEOUT_MS)? {
            config.per_stage_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_PLANNER_TIMEOUT_MS)? {
            config.planner_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_RETAINED_RUNS)? {
            config.max_retained_runs = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value: raw,
            }),
    }
}
