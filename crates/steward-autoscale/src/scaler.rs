//! Autoscaler — one control loop per autoscaled deployment.
//!
//! Each deployment owns a slot holding its config, its [`DeploymentScaler`]
//! and the replica count last reported by the controller. A background task
//! per deployment ticks every `metrics_interval_s`, reads the rolling load
//! average from the [`MetricsAggregator`] and commits scaling decisions.
//! The autoscaler only computes targets; starting and stopping replicas is
//! the caller's job, optionally via the scale callback.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use steward_metrics::MetricsAggregator;
use steward_state::{AutoscalingConfig, DeploymentId, Timestamp, ValidationError, now_secs};

use crate::policy::{DeploymentScaler, ScaleDecision};

#[derive(Debug, thiserror::Error)]
pub enum AutoscaleError {
    #[error("invalid autoscaling config: {0}")]
    Validation(#[from] ValidationError),
    #[error("deployment {0} is not autoscaled")]
    UnknownDeployment(DeploymentId),
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

/// Callback type for acting on scaling decisions.
///
/// The autoscaler calls this with (deployment, target_replicas).
pub type ScaleCallback = Arc<dyn Fn(DeploymentId, u32) -> BoxFuture + Send + Sync>;

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Per-deployment scaling state, mutated only under its own lock.
struct ScalerSlot {
    config: AutoscalingConfig,
    scaler: DeploymentScaler,
    current_replicas: u32,
}

/// Handle of a deployment's background tick task.
struct TaskSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl TaskSlot {
    fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

struct Registered {
    slot: Arc<Mutex<ScalerSlot>>,
    task: Option<TaskSlot>,
}

/// Tracks every autoscaled deployment. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Autoscaler {
    metrics: MetricsAggregator,
    deployments: Arc<RwLock<HashMap<DeploymentId, Registered>>>,
    on_scale: Option<ScaleCallback>,
}

impl Autoscaler {
    pub fn new(metrics: MetricsAggregator) -> Self {
        Self {
            metrics,
            deployments: Arc::new(RwLock::new(HashMap::new())),
            on_scale: None,
        }
    }

    /// Set the callback invoked on every committed scaling decision.
    pub fn with_callback(mut self, callback: ScaleCallback) -> Self {
        self.on_scale = Some(callback);
        self
    }

    /// Register (or re-configure) a deployment without starting its loop.
    /// Returns the current desired replica count.
    ///
    /// A new deployment starts at `initial_replicas`, else `min_replicas`.
    /// Re-registering keeps the existing desired count, clamped into the
    /// new bounds.
    pub async fn register(
        &self,
        id: &DeploymentId,
        config: AutoscalingConfig,
        current_replicas: u32,
    ) -> AutoscaleResult<u32> {
        config.validate()?;
        let mut deployments = self.deployments.write().await;

        if let Some(existing) = deployments.get(id) {
            let mut slot = existing.slot.lock().expect("scaler slot lock");
            let desired = slot.scaler.rebound(&config);
            slot.config = config;
            slot.current_replicas = current_replicas;
            debug!(deployment = %id, desired, "autoscaling config updated");
            return Ok(desired);
        }

        let scaler = DeploymentScaler::new(&config);
        let desired = scaler.desired();
        deployments.insert(
            id.clone(),
            Registered {
                slot: Arc::new(Mutex::new(ScalerSlot {
                    config,
                    scaler,
                    current_replicas,
                })),
                task: None,
            },
        );
        info!(deployment = %id, desired, "deployment registered for autoscaling");
        Ok(desired)
    }

    /// Register a deployment and spawn its tick loop, replacing any loop
    /// already running for it.
    pub async fn start(
        &self,
        id: &DeploymentId,
        config: AutoscalingConfig,
        current_replicas: u32,
    ) -> AutoscaleResult<u32> {
        let metrics_interval_s = config.metrics_interval_s;
        let desired = self.register(id, config, current_replicas).await?;
        let interval = Duration::from_secs_f64(metrics_interval_s);

        let mut deployments = self.deployments.write().await;
        let registered = deployments
            .get_mut(id)
            .ok_or_else(|| AutoscaleError::UnknownDeployment(id.clone()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_scaler_loop(
            id.clone(),
            registered.slot.clone(),
            self.metrics.clone(),
            self.on_scale.clone(),
            interval,
            shutdown_rx,
        ));
        if let Some(old) = registered.task.replace(TaskSlot {
            handle,
            shutdown_tx,
        }) {
            old.stop();
        }

        info!(deployment = %id, interval_secs = interval.as_secs_f64(), "autoscaler loop started");
        Ok(desired)
    }

    /// Stop a deployment's loop and forget its state.
    pub async fn stop(&self, id: &DeploymentId) {
        let mut deployments = self.deployments.write().await;
        if let Some(registered) = deployments.remove(id) {
            if let Some(task) = registered.task {
                task.stop();
            }
            info!(deployment = %id, "autoscaler stopped");
        }
    }

    /// Stop all loops (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut deployments = self.deployments.write().await;
        for (id, registered) in deployments.drain() {
            if let Some(task) = registered.task {
                task.stop();
            }
            debug!(deployment = %id, "autoscaler stopped");
        }
        info!("all autoscalers stopped");
    }

    /// Record how many replicas the deployment is currently running.
    pub async fn set_current_replicas(&self, id: &DeploymentId, replicas: u32) -> AutoscaleResult<()> {
        let deployments = self.deployments.read().await;
        let registered = deployments
            .get(id)
            .ok_or_else(|| AutoscaleError::UnknownDeployment(id.clone()))?;
        registered.slot.lock().expect("scaler slot lock").current_replicas = replicas;
        Ok(())
    }

    pub async fn desired_replicas(&self, id: &DeploymentId) -> Option<u32> {
        let deployments = self.deployments.read().await;
        deployments
            .get(id)
            .map(|registered| registered.slot.lock().expect("scaler slot lock").scaler.desired())
    }

    /// Evaluate one tick for `id` at time `now`.
    pub async fn tick(&self, id: &DeploymentId, now: Timestamp) -> AutoscaleResult<ScaleDecision> {
        let slot = {
            let deployments = self.deployments.read().await;
            deployments
                .get(id)
                .map(|registered| registered.slot.clone())
                .ok_or_else(|| AutoscaleError::UnknownDeployment(id.clone()))?
        };
        Ok(tick_slot(id, &slot, &self.metrics, self.on_scale.as_ref(), now).await)
    }

    pub async fn is_running(&self, id: &DeploymentId) -> bool {
        let deployments = self.deployments.read().await;
        deployments
            .get(id)
            .is_some_and(|registered| registered.task.is_some())
    }

    pub async fn deployments(&self) -> Vec<DeploymentId> {
        let deployments = self.deployments.read().await;
        let mut ids: Vec<DeploymentId> = deployments.keys().cloned().collect();
        ids.sort();
        ids
    }
}

async fn tick_slot(
    id: &DeploymentId,
    slot: &Mutex<ScalerSlot>,
    metrics: &MetricsAggregator,
    on_scale: Option<&ScaleCallback>,
    now: Timestamp,
) -> ScaleDecision {
    let look_back = slot.lock().expect("scaler slot lock").config.look_back_period_s;
    let avg = metrics.rolling_average(id, look_back, now).await;

    let decision = {
        let mut guard = slot.lock().expect("scaler slot lock");
        let ScalerSlot {
            config,
            scaler,
            current_replicas,
        } = &mut *guard;
        scaler.decide(config, *current_replicas, avg, now)
    };

    if let ScaleDecision::ScaleTo(target) = decision {
        info!(deployment = %id, target, avg = ?avg, "autoscaler target changed");
        if let Some(callback) = on_scale
            && let Err(e) = callback(id.clone(), target).await
        {
            warn!(deployment = %id, target, error = %e, "scaling action failed");
        }
    }
    decision
}

/// The tick loop for a single deployment.
async fn run_scaler_loop(
    id: DeploymentId,
    slot: Arc<Mutex<ScalerSlot>>,
    metrics: MetricsAggregator,
    on_scale: Option<ScaleCallback>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick_slot(&id, &slot, &metrics, on_scale.as_ref(), now_secs()).await;
            }
            _ = shutdown.changed() => {
                debug!(deployment = %id, "autoscaler loop shutting down");
                break;
            }
        }
    }
}
