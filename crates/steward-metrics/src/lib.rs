//! steward-metrics — replica load aggregation for autoscaling.
//!
//! Replicas push periodic in-flight request counts. The aggregator keeps a
//! rolling window per deployment and answers average-load queries for the
//! autoscaler; the same data is exposed in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricsAggregator
//!   ├── record() ← replica load samples
//!   ├── rolling_average() → Autoscaler tick
//!   └── load() → LoadReport
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```
//!
//! A replica that stops reporting drops out of the average rather than
//! counting as zero load.

pub mod aggregator;
pub mod prometheus;

pub use aggregator::{DeploymentLoad, MetricsAggregator, MetricsError, MetricsResult};
pub use prometheus::{LoadReport, render_prometheus};
