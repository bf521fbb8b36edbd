//! steward-autoscale — load-driven replica targets.
//!
//! Reads the rolling in-flight request average of each deployment from the
//! `MetricsAggregator`, converts it into a replica count, and commits the
//! change only once it has persisted for the configured delay.
//!
//! # Scaling Algorithm
//!
//! ```text
//! avg      = rolling_average(deployment, look_back_period_s)
//! if avg is None:
//!     hold                                   // no replica reported
//!
//! raw      = round_half_up(current * avg / target)
//! proposal = round_half_up(current + smoothing * (raw - current))
//! proposal = clamp(proposal, min_replicas, max_replicas)
//!
//! proposal > desired for upscale_delay_s   → ScaleTo(proposal)
//! proposal < desired for downscale_delay_s → ScaleTo(proposal)
//! proposal == desired or direction flips   → reset timer
//! ```
//!
//! Each deployment ticks on its own task every `metrics_interval_s`, so a
//! slow deployment never delays another.

pub mod policy;
pub mod scaler;

pub use policy::{DeploymentScaler, ScaleDecision, proposed_replicas, round_half_up};
pub use scaler::{AutoscaleError, AutoscaleResult, Autoscaler, ScaleCallback};
