//! steward-health — replica health and status state machines.
//!
//! Probes replicas over HTTP, tracks how long each has been failing, and
//! folds replica health plus rollout progress into deployment and
//! application statuses.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   └── Per-replica background task
//!       ├── HealthProbe::probe() → ProbeResult
//!       └── HealthCallback(HealthReport)
//!
//! DeploymentStateMachine
//!   ├── HealthTracker per replica (failure streak vs health_check_timeout_s)
//!   ├── replica lifecycle events, start-failure counting
//!   └── UPDATING / HEALTHY / UNHEALTHY
//!
//! ApplicationStateMachine
//!   └── NOT_STARTED / DEPLOYING / RUNNING / UNHEALTHY / DEPLOY_FAILED / DELETING
//! ```
//!
//! # Self-Healing
//!
//! A replica whose probes keep failing for `health_check_timeout_s` marks
//! its deployment UNHEALTHY and is reported by
//! `DeploymentStateMachine::unhealthy_replicas` so the controller can stop
//! and replace it. The deployment stays UNHEALTHY until a new version is
//! submitted.

pub mod application;
pub mod checker;
pub mod deployment;
pub mod monitor;

pub use application::ApplicationStateMachine;
pub use checker::{HealthProbe, HealthTracker, HttpProbe, ProbeFuture, ProbeResult, ReplicaHealth, http_probe};
pub use deployment::DeploymentStateMachine;
pub use monitor::{HealthCallback, HealthMonitor, HealthReport, ProbeSchedule};
