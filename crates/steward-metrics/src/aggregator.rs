//! Metrics aggregator — rolling per-deployment windows of replica load.
//!
//! Replicas push their in-flight request count periodically. The aggregator
//! keeps a short history per replica and answers "what is the average load
//! per reporting replica over the last N seconds".

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, trace};

use steward_state::{DeploymentId, ReplicaId, Timestamp};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    #[error("in-flight count must be finite, got {0}")]
    NonFinite(f64),
    #[error("in-flight count must be non-negative, got {0}")]
    Negative(f64),
    #[error("sample timestamp must be finite, got {0}")]
    BadTimestamp(f64),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    in_flight: f64,
    timestamp: Timestamp,
}

/// Samples per replica, oldest first.
#[derive(Default)]
struct DeploymentWindow {
    replicas: HashMap<ReplicaId, VecDeque<Sample>>,
}

impl DeploymentWindow {
    fn prune(&mut self, horizon: Timestamp) {
        self.replicas.retain(|_, samples| {
            while samples.front().is_some_and(|s| s.timestamp < horizon) {
                samples.pop_front();
            }
            !samples.is_empty()
        });
    }
}

/// Load summary of one deployment over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeploymentLoad {
    /// Mean of each reporting replica's latest in-window sample.
    pub average_in_flight: Option<f64>,
    pub reporting_replicas: usize,
}

/// Aggregates replica load samples. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MetricsAggregator {
    windows: Arc<RwLock<HashMap<DeploymentId, DeploymentWindow>>>,
    /// Samples older than this (seconds) are discarded.
    retention_s: f64,
}

impl MetricsAggregator {
    pub fn new(retention_s: f64) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            retention_s,
        }
    }

    /// Record one sample.
    ///
    /// A sample older than the replica's latest one is ignored; one with the
    /// same timestamp replaces it.
    pub async fn record(
        &self,
        deployment: &DeploymentId,
        replica: &str,
        in_flight: f64,
        timestamp: Timestamp,
    ) -> MetricsResult<()> {
        if !in_flight.is_finite() {
            return Err(MetricsError::NonFinite(in_flight));
        }
        if in_flight < 0.0 {
            return Err(MetricsError::Negative(in_flight));
        }
        if !timestamp.is_finite() {
            return Err(MetricsError::BadTimestamp(timestamp));
        }

        let mut windows = self.windows.write().await;
        let window = windows.entry(deployment.clone()).or_default();
        let samples = window.replicas.entry(replica.to_string()).or_default();

        match samples.back_mut() {
            Some(last) if timestamp < last.timestamp => {
                debug!(
                    deployment = %deployment,
                    %replica,
                    timestamp,
                    latest = last.timestamp,
                    "ignoring out-of-order sample"
                );
                return Ok(());
            }
            Some(last) if timestamp == last.timestamp => last.in_flight = in_flight,
            _ => samples.push_back(Sample {
                in_flight,
                timestamp,
            }),
        }

        let horizon = timestamp - self.retention_s;
        while samples.front().is_some_and(|s| s.timestamp < horizon) {
            samples.pop_front();
        }
        trace!(deployment = %deployment, %replica, in_flight, "sample recorded");
        Ok(())
    }

    /// Average in-flight requests per reporting replica over the last
    /// `window_s` seconds, or `None` when no replica reported.
    pub async fn rolling_average(
        &self,
        deployment: &DeploymentId,
        window_s: f64,
        now: Timestamp,
    ) -> Option<f64> {
        self.load(deployment, window_s, now).await.average_in_flight
    }

    pub async fn load(
        &self,
        deployment: &DeploymentId,
        window_s: f64,
        now: Timestamp,
    ) -> DeploymentLoad {
        let windows = self.windows.read().await;
        let horizon = now - window_s;

        let latest: Vec<f64> = windows
            .get(deployment)
            .map(|window| {
                window
                    .replicas
                    .values()
                    .filter_map(|samples| samples.back())
                    .filter(|sample| sample.timestamp >= horizon)
                    .map(|sample| sample.in_flight)
                    .collect()
            })
            .unwrap_or_default();

        let average_in_flight =
            (!latest.is_empty()).then(|| latest.iter().sum::<f64>() / latest.len() as f64);
        DeploymentLoad {
            average_in_flight,
            reporting_replicas: latest.len(),
        }
    }

    /// Forget a stopped replica.
    pub async fn remove_replica(&self, deployment: &DeploymentId, replica: &str) {
        let mut windows = self.windows.write().await;
        if let Some(window) = windows.get_mut(deployment) {
            window.replicas.remove(replica);
        }
    }

    pub async fn remove_deployment(&self, deployment: &DeploymentId) {
        self.windows.write().await.remove(deployment);
        debug!(deployment = %deployment, "metrics window removed");
    }

    /// Drop every sample older than the retention period relative to `now`.
    pub async fn prune(&self, now: Timestamp) {
        let horizon = now - self.retention_s;
        let mut windows = self.windows.write().await;
        for window in windows.values_mut() {
            window.prune(horizon);
        }
    }

    /// Deployments with at least one retained sample.
    pub async fn deployments(&self) -> Vec<DeploymentId> {
        let windows = self.windows.read().await;
        let mut ids: Vec<DeploymentId> = windows
            .iter()
            .filter(|(_, window)| !window.replicas.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
