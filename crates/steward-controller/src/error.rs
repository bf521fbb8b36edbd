use steward_autoscale::AutoscaleError;
use steward_metrics::MetricsError;
use steward_state::{DeploymentId, ReplicaId, StateError, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("invalid application: {0}")]
    Validation(#[from] ValidationError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Autoscale(#[from] AutoscaleError),

    #[error("invalid load sample: {0}")]
    Metrics(#[from] MetricsError),

    #[error("application {0} not found")]
    UnknownApplication(String),

    #[error("deployment {0} not found")]
    UnknownDeployment(DeploymentId),

    #[error("replica {replica} is not part of deployment {deployment}")]
    UnknownReplica {
        deployment: DeploymentId,
        replica: ReplicaId,
    },

    #[error("application {0} is being deleted")]
    Deleting(String),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
