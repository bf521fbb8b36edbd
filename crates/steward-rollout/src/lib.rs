//! Steward rollouts — version reconciliation and rolling replacement.
//!
//! This crate decides how a deployment's live replicas converge to its
//! desired version and replica count. Plans are instructions only; the
//! controller executes them by publishing replica assignments.
//!
//! # Components
//!
//! - **`strategy`** — Rolling replacement configuration (batch size)
//! - **`reconciler`** — `VersionReconciler` producing a `ReconcilePlan`

pub mod reconciler;
pub mod strategy;

pub use reconciler::{DesiredState, LiveReplica, ReconcilePlan, VersionReconciler};
pub use strategy::{RollingConfig, batch_count};
