//! Inbound reports from replica lifecycle managers and replicas.

use serde::{Deserialize, Serialize};

use steward_health::{HealthReport, ProbeResult};
use steward_state::{DeploymentId, ReplicaId, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplicaEventKind {
    /// The replica is up. `address` enables HTTP health probing.
    Started {
        #[serde(default)]
        address: Option<String>,
    },
    Stopped,
    StartFailed { error: String },
    /// A health check result observed outside the controller.
    HealthCheck { result: ProbeResult },
}

/// A lifecycle report about one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaEvent {
    pub deployment: DeploymentId,
    pub replica_id: ReplicaId,
    #[serde(flatten)]
    pub kind: ReplicaEventKind,
}

impl From<HealthReport> for ReplicaEvent {
    fn from(report: HealthReport) -> Self {
        Self {
            deployment: report.deployment,
            replica_id: report.replica,
            kind: ReplicaEventKind::HealthCheck {
                result: report.result,
            },
        }
    }
}

/// One in-flight request count pushed by a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub deployment: DeploymentId,
    pub replica_id: ReplicaId,
    pub in_flight: f64,
    /// Receipt time is used when absent.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}
