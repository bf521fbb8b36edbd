//! steward.toml configuration parser.
//!
//! Every section and field is optional in the file; missing values fall
//! back to the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating the daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StewardConfig {
    pub server: ServerConfig,
    pub control: ControlConfig,
    pub long_poll: LongPollConfig,
    pub metrics: MetricsConfig,
    pub health: HealthProbeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Period of the reconcile loop.
    pub reconcile_interval_s: f64,
    /// Replica start failures tolerated before a deployment is marked unhealthy.
    pub max_replica_start_failures: u32,
    /// Outdated replicas replaced per reconcile pass.
    pub rollout_batch_size: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_s: 0.1,
            max_replica_start_failures: 3,
            rollout_batch_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongPollConfig {
    /// Timeout applied when a request does not carry one.
    pub default_timeout_s: f64,
    /// Upper bound on any requested timeout.
    pub max_timeout_s: f64,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            default_timeout_s: 30.0,
            max_timeout_s: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// How long replica samples are retained by the aggregator.
    pub retention_s: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { retention_s: 600.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthProbeConfig {
    /// Path probed on each replica address.
    pub probe_path: String,
    /// Run HTTP probes from the controller. When disabled, health results
    /// must be reported by the replica lifecycle manager.
    pub probes_enabled: bool,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            probe_path: "/-/healthz".to_string(),
            probes_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,stewardd=debug,steward=debug".to_string(),
            json: false,
        }
    }
}

impl StewardConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StewardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the control loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_duration("control.reconcile_interval_s", self.control.reconcile_interval_s)?;
        if self.control.rollout_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "control.rollout_batch_size must be at least 1".to_string(),
            ));
        }
        require_duration("long_poll.default_timeout_s", self.long_poll.default_timeout_s)?;
        require_duration("long_poll.max_timeout_s", self.long_poll.max_timeout_s)?;
        if self.long_poll.max_timeout_s < self.long_poll.default_timeout_s {
            return Err(ConfigError::Invalid(format!(
                "long_poll.max_timeout_s ({}) is below default_timeout_s ({})",
                self.long_poll.max_timeout_s, self.long_poll.default_timeout_s
            )));
        }
        if !(self.metrics.retention_s > 0.0) {
            return Err(ConfigError::Invalid(
                "metrics.retention_s must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs_f64(self.control.reconcile_interval_s)
    }
}

fn require_duration(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0) || Duration::try_from_secs_f64(value).is_err() {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a positive number of seconds, got {value}"
        )));
    }
    Ok(())
}

impl LongPollConfig {
    /// Resolve a caller-requested timeout against the configured bounds.
    pub fn resolve_timeout(&self, requested_s: Option<f64>) -> Duration {
        let secs = match requested_s {
            Some(s) if s.is_finite() && s >= 0.0 => s.min(self.max_timeout_s),
            _ => self.default_timeout_s,
        };
        Duration::from_secs_f64(secs)
    }
}
