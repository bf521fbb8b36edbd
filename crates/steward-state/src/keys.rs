//! Well-known keys of the versioned key store.
//!
//! All values written under these keys are JSON documents; subscribers
//! know the schema of each key by its prefix.

use crate::types::DeploymentId;

/// The [`crate::EndpointSet`] of every routable endpoint.
pub const ENDPOINTS: &str = "endpoints";

const DEPLOYMENT_CONFIG_PREFIX: &str = "deployment_config:";
const REPLICA_ASSIGNMENTS_PREFIX: &str = "replicas:";
const RUNNING_REPLICAS_PREFIX: &str = "running_replicas:";

/// The [`crate::DeploymentInfo`] of a deployment.
pub fn deployment_config(id: &DeploymentId) -> String {
    format!("{DEPLOYMENT_CONFIG_PREFIX}{id}")
}

/// The [`crate::ReplicaAssignments`] a lifecycle manager converges to.
pub fn replica_assignments(id: &DeploymentId) -> String {
    format!("{REPLICA_ASSIGNMENTS_PREFIX}{id}")
}

/// The [`crate::RunningReplicas`] routers send traffic to.
pub fn running_replicas(id: &DeploymentId) -> String {
    format!("{RUNNING_REPLICAS_PREFIX}{id}")
}

/// Every per-deployment key, for cleanup on teardown.
pub fn deployment_keys(id: &DeploymentId) -> [String; 3] {
    [
        deployment_config(id),
        replica_assignments(id),
        running_replicas(id),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_deployment_keys_are_distinct() {
        let id = DeploymentId::new("shop", "ranker");
        let keys = deployment_keys(&id);
        assert_eq!(keys[0], "deployment_config:shop/ranker");
        assert_eq!(keys[1], "replicas:shop/ranker");
        assert_eq!(keys[2], "running_replicas:shop/ranker");
    }
}
