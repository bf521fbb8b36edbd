//! steward-core — configuration shared by the Steward daemon and its
//! subsystems.

pub mod config;

pub use config::{
    ConfigError, ControlConfig, HealthProbeConfig, LoggingConfig, LongPollConfig, MetricsConfig,
    ServerConfig, StewardConfig,
};
