//! ApplicationStateMachine — aggregates deployment statuses.

use tracing::info;

use steward_state::{
    ApplicationStatus, ApplicationStatusInfo, DeploymentStatus, DeploymentStatusInfo, Timestamp,
};

#[derive(Debug, Clone)]
pub struct ApplicationStateMachine {
    name: String,
    status: ApplicationStatus,
    message: String,
    deployment_timestamp: Timestamp,
}

impl ApplicationStateMachine {
    /// A new application is NOT_STARTED until its first submission.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ApplicationStatus::NotStarted,
            message: String::new(),
            deployment_timestamp: 0.0,
        }
    }

    pub fn status(&self) -> ApplicationStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn info(&self) -> ApplicationStatusInfo {
        ApplicationStatusInfo {
            status: self.status,
            message: self.message.clone(),
            deployment_timestamp: self.deployment_timestamp,
        }
    }

    /// A submission was accepted at `now`.
    pub fn deploy(&mut self, now: Timestamp) {
        self.deployment_timestamp = now;
        self.transition(ApplicationStatus::Deploying, String::new());
    }

    pub fn delete(&mut self) {
        self.transition(ApplicationStatus::Deleting, String::new());
    }

    /// Fold the current deployment statuses into the application status.
    pub fn update(&mut self, deployments: &[DeploymentStatusInfo]) -> ApplicationStatus {
        let unhealthy = deployments
            .iter()
            .find(|d| d.status == DeploymentStatus::Unhealthy);
        let all_healthy = deployments
            .iter()
            .all(|d| d.status == DeploymentStatus::Healthy);

        match (self.status, unhealthy) {
            (ApplicationStatus::Deploying, Some(failed)) => {
                let message = format!(
                    "deployment {} failed: {}",
                    failed.name, failed.message
                );
                self.transition(ApplicationStatus::DeployFailed, message);
            }
            (ApplicationStatus::Deploying, None) if all_healthy => {
                self.transition(ApplicationStatus::Running, String::new());
            }
            (ApplicationStatus::Running, Some(failed)) => {
                let message = format!(
                    "deployment {} is unhealthy: {}",
                    failed.name, failed.message
                );
                self.transition(ApplicationStatus::Unhealthy, message);
            }
            (ApplicationStatus::Unhealthy, None) => {
                self.transition(ApplicationStatus::Running, String::new());
            }
            _ => {}
        }
        self.status
    }

    fn transition(&mut self, status: ApplicationStatus, message: String) {
        if self.status != status {
            info!(app = %self.name, from = ?self.status, to = ?status, %message, "application status changed");
        }
        self.status = status;
        self.message = message;
    }
}
