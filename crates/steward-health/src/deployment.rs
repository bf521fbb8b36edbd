//! DeploymentStateMachine — UPDATING / HEALTHY / UNHEALTHY for one
//! deployment.
//!
//! ```text
//!            submit_version
//!   ┌──────────────────────────────────┐
//!   ▼                                  │
//! UPDATING ──converged──► HEALTHY      │
//!   │  ▲                    │          │
//!   │  └─target changed ────┤          │
//!   │     or replica lost   │          │
//!   └──sustained failure────┴──► UNHEALTHY
//! ```
//!
//! Converged means: as many running replicas as the target, all on the
//! target version, none currently failing health checks. UNHEALTHY is left
//! only through a new version submission.

use std::collections::BTreeMap;

use tracing::{info, warn};

use steward_state::{
    DeploymentId, DeploymentStatus, DeploymentStatusInfo, DeploymentVersion, ReplicaId, Timestamp,
};

use crate::checker::{HealthTracker, ProbeResult, ReplicaHealth};

#[derive(Debug, Clone)]
struct ReplicaRecord {
    version: DeploymentVersion,
    tracker: HealthTracker,
}

#[derive(Debug, Clone)]
pub struct DeploymentStateMachine {
    id: DeploymentId,
    status: DeploymentStatus,
    message: String,
    target_version: DeploymentVersion,
    target_replicas: u32,
    health_check_timeout_s: f64,
    replicas: BTreeMap<ReplicaId, ReplicaRecord>,
    consecutive_start_failures: u32,
    max_start_failures: u32,
}

impl DeploymentStateMachine {
    pub fn new(
        id: DeploymentId,
        version: DeploymentVersion,
        target_replicas: u32,
        health_check_timeout_s: f64,
        max_start_failures: u32,
    ) -> Self {
        Self {
            id,
            status: DeploymentStatus::Updating,
            message: String::new(),
            target_version: version,
            target_replicas,
            health_check_timeout_s,
            replicas: BTreeMap::new(),
            consecutive_start_failures: 0,
            max_start_failures,
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn target_replicas(&self) -> u32 {
        self.target_replicas
    }

    pub fn info(&self) -> DeploymentStatusInfo {
        DeploymentStatusInfo {
            name: self.id.name.clone(),
            status: self.status,
            message: self.message.clone(),
        }
    }

    /// A new version was submitted. Always returns to UPDATING; health
    /// history and start failures are forgotten.
    pub fn submit_version(
        &mut self,
        version: DeploymentVersion,
        target_replicas: u32,
        health_check_timeout_s: f64,
    ) {
        self.target_version = version;
        self.target_replicas = target_replicas;
        self.health_check_timeout_s = health_check_timeout_s;
        self.consecutive_start_failures = 0;
        for record in self.replicas.values_mut() {
            record.tracker = HealthTracker::new(health_check_timeout_s);
        }
        self.transition(DeploymentStatus::Updating, String::new());
    }

    pub fn set_target_replicas(&mut self, target_replicas: u32) {
        if target_replicas == self.target_replicas {
            return;
        }
        self.target_replicas = target_replicas;
        if self.status == DeploymentStatus::Healthy {
            self.transition(
                DeploymentStatus::Updating,
                format!("scaling to {target_replicas} replicas"),
            );
        }
    }

    /// A replica finished starting. Starting counts as its first passed
    /// health check.
    pub fn replica_started(&mut self, replica: &str, version: DeploymentVersion, now: Timestamp) {
        let mut tracker = HealthTracker::new(self.health_check_timeout_s);
        tracker.record(ProbeResult::Healthy, now);
        self.replicas
            .insert(replica.to_string(), ReplicaRecord { version, tracker });
        self.consecutive_start_failures = 0;
    }

    /// A replica is gone. While HEALTHY this means it was lost.
    pub fn replica_stopped(&mut self, replica: &str) {
        if self.replicas.remove(replica).is_some() && self.status == DeploymentStatus::Healthy {
            self.transition(
                DeploymentStatus::Updating,
                format!("replica {replica} stopped; replacing it"),
            );
        }
    }

    pub fn replica_start_failed(&mut self, replica: &str, error: &str) {
        self.consecutive_start_failures += 1;
        warn!(
            deployment = %self.id,
            %replica,
            failures = self.consecutive_start_failures,
            %error,
            "replica failed to start"
        );
        if self.consecutive_start_failures >= self.max_start_failures
            && self.status != DeploymentStatus::Unhealthy
        {
            self.transition(
                DeploymentStatus::Unhealthy,
                format!(
                    "replicas failed to start {} times in a row; last error from {replica}: {error}",
                    self.consecutive_start_failures
                ),
            );
        }
    }

    /// Record a health probe result. Returns the replica's health, or
    /// `None` for a replica this deployment does not know.
    pub fn record_health(
        &mut self,
        replica: &str,
        result: ProbeResult,
        now: Timestamp,
    ) -> Option<ReplicaHealth> {
        let record = self.replicas.get_mut(replica)?;
        let health = record.tracker.record(result, now);
        if health == ReplicaHealth::Unhealthy && self.status != DeploymentStatus::Unhealthy {
            let message = format!(
                "replica {replica} failed health checks for at least {}s",
                self.health_check_timeout_s
            );
            self.transition(DeploymentStatus::Unhealthy, message);
        }
        Some(health)
    }

    pub fn replica_health(&self, replica: &str) -> Option<ReplicaHealth> {
        self.replicas.get(replica).map(|r| r.tracker.status())
    }

    /// Replicas that must be stopped and replaced.
    pub fn unhealthy_replicas(&self) -> Vec<ReplicaId> {
        self.replicas
            .iter()
            .filter(|(_, r)| r.tracker.needs_replacement())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether the running set matches the target exactly.
    pub fn is_converged(&self) -> bool {
        self.replicas.len() == self.target_replicas as usize
            && self.replicas.values().all(|r| {
                r.version == self.target_version && r.tracker.status() == ReplicaHealth::Healthy
            })
    }

    /// Re-evaluate after a reconcile pass and return the (possibly new)
    /// status.
    pub fn evaluate(&mut self) -> DeploymentStatus {
        match self.status {
            DeploymentStatus::Updating if self.is_converged() => {
                self.transition(DeploymentStatus::Healthy, String::new());
            }
            DeploymentStatus::Healthy if !self.is_converged() => {
                self.transition(
                    DeploymentStatus::Updating,
                    "running replicas diverged from target".to_string(),
                );
            }
            _ => {}
        }
        self.status
    }

    fn transition(&mut self, status: DeploymentStatus, message: String) {
        if self.status != status {
            info!(
                deployment = %self.id,
                from = ?self.status,
                to = ?status,
                %message,
                "deployment status changed"
            );
        }
        self.status = status;
        self.message = message;
    }
}
