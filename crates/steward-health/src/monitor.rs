//! Health monitor — background tasks that probe replicas.
//!
//! The `HealthMonitor` spawns a background task per replica that probes it
//! every `health_check_period_s` and hands each result to a callback. It
//! keeps no health state of its own; interpreting results is the job of the
//! deployment state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use steward_state::{DeploymentId, ReplicaId, Timestamp, now_secs};

use crate::checker::{HealthProbe, ProbeResult};

/// One probe outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub deployment: DeploymentId,
    pub replica: ReplicaId,
    pub result: ProbeResult,
    pub timestamp: Timestamp,
}

/// Callback invoked with every probe result.
pub type HealthCallback = Arc<dyn Fn(HealthReport) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Probe schedule of one replica.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSchedule {
    pub period: Duration,
    pub timeout: Duration,
}

impl ProbeSchedule {
    pub fn from_secs(period_s: f64, timeout_s: f64) -> Self {
        Self {
            period: Duration::from_secs_f64(period_s),
            timeout: Duration::from_secs_f64(timeout_s),
        }
    }
}

/// Per-replica monitor state.
struct MonitorSlot {
    deployment: DeploymentId,
    /// Handle to the background check task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this monitor.
    shutdown_tx: watch::Sender<bool>,
}

impl MonitorSlot {
    fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

/// Manages health probes for every running replica. Cheap to clone.
#[derive(Clone)]
pub struct HealthMonitor {
    probe: Arc<dyn HealthProbe>,
    /// Active monitors: replica_id → slot.
    monitors: Arc<RwLock<HashMap<ReplicaId, MonitorSlot>>>,
    on_result: Option<HealthCallback>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            probe,
            monitors: Arc::new(RwLock::new(HashMap::new())),
            on_result: None,
        }
    }

    /// Set the callback receiving probe results.
    pub fn with_callback(mut self, callback: HealthCallback) -> Self {
        self.on_result = Some(callback);
        self
    }

    /// Start probing a replica at `address`, replacing any existing monitor
    /// for the same replica.
    pub async fn start_monitor(
        &self,
        deployment: &DeploymentId,
        replica: &str,
        address: &str,
        schedule: ProbeSchedule,
    ) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_health_loop(
            deployment.clone(),
            replica.to_string(),
            address.to_string(),
            schedule,
            self.probe.clone(),
            self.on_result.clone(),
            shutdown_rx,
        ));

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            replica.to_string(),
            MonitorSlot {
                deployment: deployment.clone(),
                handle,
                shutdown_tx,
            },
        ) {
            // Stop the old monitor if one was running.
            old.stop();
        }

        info!(deployment = %deployment, %replica, %address, "health monitor started");
    }

    /// Stop probing a replica.
    pub async fn stop_monitor(&self, replica: &str) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(replica) {
            slot.stop();
            info!(%replica, "health monitor stopped");
        }
    }

    /// Stop every monitor belonging to a deployment.
    pub async fn stop_deployment(&self, deployment: &DeploymentId) {
        let mut monitors = self.monitors.write().await;
        let replicas: Vec<ReplicaId> = monitors
            .iter()
            .filter(|(_, slot)| &slot.deployment == deployment)
            .map(|(replica, _)| replica.clone())
            .collect();
        for replica in replicas {
            if let Some(slot) = monitors.remove(&replica) {
                slot.stop();
                debug!(deployment = %deployment, %replica, "health monitor stopped");
            }
        }
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (replica, slot) in monitors.drain() {
            slot.stop();
            debug!(%replica, "health monitor stopped");
        }
        info!("all health monitors stopped");
    }

    /// Replica IDs with active monitors, sorted.
    pub async fn active_monitors(&self) -> Vec<ReplicaId> {
        let monitors = self.monitors.read().await;
        let mut replicas: Vec<ReplicaId> = monitors.keys().cloned().collect();
        replicas.sort();
        replicas
    }

    pub async fn is_monitoring(&self, replica: &str) -> bool {
        self.monitors.read().await.contains_key(replica)
    }
}

/// The probe loop for a single replica.
async fn run_health_loop(
    deployment: DeploymentId,
    replica: ReplicaId,
    address: String,
    schedule: ProbeSchedule,
    probe: Arc<dyn HealthProbe>,
    callback: Option<HealthCallback>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + schedule.period, schedule.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(deployment = %deployment, %replica, "health loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = probe.probe(&address, schedule.timeout).await;
                if let Some(ref cb) = callback {
                    cb(HealthReport {
                        deployment: deployment.clone(),
                        replica: replica.clone(),
                        result,
                        timestamp: now_secs(),
                    })
                    .await;
                }
            }
            _ = shutdown.changed() => {
                debug!(deployment = %deployment, %replica, "health loop shutting down");
                break;
            }
        }
    }
}
