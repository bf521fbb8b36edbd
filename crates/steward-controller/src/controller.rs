//! Controller — owns every declared application and reconciles it.
//!
//! Each pass walks all deployments: it syncs autoscaler targets, queues
//! unhealthy replicas for replacement, asks the `VersionReconciler` for a
//! plan, executes it against the replica table, and publishes the result
//! (replica assignments, running replicas, deployment info, endpoints)
//! into the `VersionedKeyStore`. Publishing is level-triggered; unchanged
//! documents do not bump their snapshot ids.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use steward_autoscale::{Autoscaler, ScaleCallback};
use steward_core::ControlConfig;
use steward_health::{
    ApplicationStateMachine, DeploymentStateMachine, HealthCallback, HealthMonitor, HealthProbe,
    HealthReport, ProbeSchedule,
};
use steward_metrics::{LoadReport, MetricsAggregator};
use steward_rollout::{DesiredState, LiveReplica, ReconcilePlan, RollingConfig, VersionReconciler};
use steward_state::{
    ApplicationDeclaration, ApplicationStatus, CheckpointStore, DeploymentId, DeploymentInfo,
    DeploymentStatusInfo, DeploymentVersion, EndpointInfo, EndpointSet, ReplicaAssignment,
    ReplicaAssignments, ReplicaGoal, ReplicaId, RunningReplicaInfo, RunningReplicas,
    StatusOverview, Timestamp, VersionedKeyStore, keys, now_secs,
};

use crate::error::{ControllerError, ControllerResult};
use crate::events::{LoadSample, ReplicaEvent, ReplicaEventKind};

/// Look-back window for load reports of deployments without autoscaling.
const DEFAULT_LOAD_WINDOW_S: f64 = 30.0;

// ── Replica table ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum ReplicaPhase {
    /// Assigned, not yet reported as started.
    Starting,
    Running { address: Option<String> },
    /// Asked to stop; removed once the stop is reported.
    Stopping,
}

#[derive(Debug, Clone)]
struct ReplicaEntry {
    id: ReplicaId,
    version: DeploymentVersion,
    user_config: Option<serde_json::Value>,
    phase: ReplicaPhase,
    /// Started in place of an outdated replica.
    replacement: bool,
}

struct DeploymentEntry {
    info: DeploymentInfo,
    state_machine: DeploymentStateMachine,
    /// Creation order.
    replicas: Vec<ReplicaEntry>,
    next_replica_seq: u64,
    target_replicas: u32,
    /// No longer declared; drains to zero and is then removed.
    deleting: bool,
}

impl DeploymentEntry {
    fn new(info: DeploymentInfo, target_replicas: u32, max_start_failures: u32) -> Self {
        let state_machine = DeploymentStateMachine::new(
            info.id.clone(),
            info.version.clone(),
            target_replicas,
            info.deployment_config.health_check_timeout_s,
            max_start_failures,
        );
        Self {
            info,
            state_machine,
            replicas: Vec::new(),
            next_replica_seq: 0,
            target_replicas,
            deleting: false,
        }
    }

    fn id(&self) -> &DeploymentId {
        &self.info.id
    }

    fn is_autoscaled(&self) -> bool {
        self.info.deployment_config.autoscaling_config.is_some()
    }

    /// Apply a resubmission. Only a version change restarts the rollout.
    fn resubmit(&mut self, info: DeploymentInfo, target_replicas: u32) {
        self.deleting = false;
        self.target_replicas = target_replicas;
        if info.version != self.info.version {
            self.state_machine.submit_version(
                info.version.clone(),
                target_replicas,
                info.deployment_config.health_check_timeout_s,
            );
        } else {
            self.state_machine.set_target_replicas(target_replicas);
        }
        self.info = info;
    }

    fn set_target(&mut self, target_replicas: u32) {
        self.target_replicas = target_replicas;
        self.state_machine.set_target_replicas(target_replicas);
    }

    fn replica_mut(&mut self, replica: &str) -> Option<&mut ReplicaEntry> {
        self.replicas.iter_mut().find(|r| r.id == replica)
    }

    fn remove_replica(&mut self, replica: &str) -> Option<ReplicaEntry> {
        let index = self.replicas.iter().position(|r| r.id == replica)?;
        Some(self.replicas.remove(index))
    }

    fn running_count(&self) -> u32 {
        self.replicas
            .iter()
            .filter(|r| matches!(r.phase, ReplicaPhase::Running { .. }))
            .count() as u32
    }

    fn live_replicas(&self) -> Vec<LiveReplica> {
        self.replicas
            .iter()
            .filter(|r| r.phase != ReplicaPhase::Stopping)
            .map(|r| LiveReplica {
                replica_id: r.id.clone(),
                version: r.version.clone(),
                user_config: r.user_config.clone(),
                starting: r.phase == ReplicaPhase::Starting,
                replacement: r.replacement,
            })
            .collect()
    }

    fn desired_state(&self) -> DesiredState {
        DesiredState {
            version: self.info.version.clone(),
            user_config: self.info.deployment_config.user_config.clone(),
            target_replicas: if self.deleting { 0 } else { self.target_replicas },
        }
    }

    fn apply(&mut self, plan: &ReconcilePlan) {
        for replica in plan.replace_now.iter().chain(&plan.to_stop) {
            if let Some(entry) = self.replica_mut(replica) {
                entry.phase = ReplicaPhase::Stopping;
            }
        }

        let user_config = self.info.deployment_config.user_config.clone();
        for replica in &plan.reconfigure {
            if let Some(entry) = self.replica_mut(replica) {
                entry.user_config = user_config.clone();
            }
        }

        for n in 0..plan.to_start {
            let id = format!("{}#{}", self.info.id, self.next_replica_seq);
            self.next_replica_seq += 1;
            debug!(deployment = %self.info.id, replica = %id, "assigning new replica");
            self.replicas.push(ReplicaEntry {
                id,
                version: self.info.version.clone(),
                user_config: user_config.clone(),
                phase: ReplicaPhase::Starting,
                replacement: (n as usize) < plan.replace_now.len(),
            });
        }
    }

    fn assignments(&self) -> ReplicaAssignments {
        ReplicaAssignments {
            deployment: self.info.id.clone(),
            replicas: self
                .replicas
                .iter()
                .map(|r| ReplicaAssignment {
                    replica_id: r.id.clone(),
                    code_version: r.version.code_version.clone(),
                    user_config: r.user_config.clone(),
                    goal: if r.phase == ReplicaPhase::Stopping {
                        ReplicaGoal::Stopped
                    } else {
                        ReplicaGoal::Running
                    },
                })
                .collect(),
        }
    }

    fn running_replicas(&self) -> RunningReplicas {
        RunningReplicas {
            deployment: self.info.id.clone(),
            replicas: self
                .replicas
                .iter()
                .filter_map(|r| match &r.phase {
                    ReplicaPhase::Running { address } => Some(RunningReplicaInfo {
                        replica_id: r.id.clone(),
                        address: address.clone(),
                        max_concurrent_queries: self.info.deployment_config.max_concurrent_queries,
                    }),
                    _ => None,
                })
                .collect(),
        }
    }
}

struct ApplicationEntry {
    declaration: ApplicationDeclaration,
    state_machine: ApplicationStateMachine,
    deployments: BTreeMap<String, DeploymentEntry>,
}

impl ApplicationEntry {
    fn new(declaration: &ApplicationDeclaration) -> Self {
        Self {
            declaration: declaration.clone(),
            state_machine: ApplicationStateMachine::new(declaration.name.clone()),
            deployments: BTreeMap::new(),
        }
    }

    /// Statuses of the deployments still declared, by name.
    fn deployment_statuses(&self) -> Vec<DeploymentStatusInfo> {
        self.deployments
            .values()
            .filter(|d| !d.deleting)
            .map(|d| d.state_machine.info())
            .collect()
    }

    fn endpoint(&self) -> Option<(String, EndpointInfo)> {
        let route = self.declaration.route_prefix.as_ref()?;
        let ingress = self.declaration.ingress_name()?;
        let id = DeploymentId::new(&self.declaration.name, ingress);
        let config = BTreeMap::from([
            ("app".to_string(), self.declaration.name.clone()),
            ("deployment".to_string(), ingress.to_string()),
        ]);
        Some((
            id.to_string(),
            EndpointInfo {
                route: route.clone(),
                config,
            },
        ))
    }
}

#[derive(Default)]
struct ControlState {
    applications: BTreeMap<String, ApplicationEntry>,
}

impl ControlState {
    fn deployment(&self, id: &DeploymentId) -> ControllerResult<&DeploymentEntry> {
        self.applications
            .get(&id.app)
            .and_then(|app| app.deployments.get(&id.name))
            .ok_or_else(|| ControllerError::UnknownDeployment(id.clone()))
    }

    fn deployment_mut(&mut self, id: &DeploymentId) -> ControllerResult<&mut DeploymentEntry> {
        self.applications
            .get_mut(&id.app)
            .and_then(|app| app.deployments.get_mut(&id.name))
            .ok_or_else(|| ControllerError::UnknownDeployment(id.clone()))
    }
}

// ── Controller ────────────────────────────────────────────────────

struct Inner {
    store: VersionedKeyStore,
    checkpoint: Option<CheckpointStore>,
    metrics: MetricsAggregator,
    autoscaler: Autoscaler,
    reconciler: VersionReconciler,
    monitor: Option<HealthMonitor>,
    config: ControlConfig,
    state: Mutex<ControlState>,
    /// Probe results from the health monitor; taken by `run`.
    health_rx: Mutex<Option<mpsc::UnboundedReceiver<HealthReport>>>,
    /// Signalled when an autoscaler commits a new target.
    scaled: Arc<Notify>,
}

/// The control loop. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

/// Builder for [`Controller`].
pub struct ControllerBuilder {
    store: VersionedKeyStore,
    metrics: MetricsAggregator,
    config: ControlConfig,
    checkpoint: Option<CheckpointStore>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl ControllerBuilder {
    pub fn config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist declarations so they survive a restart.
    pub fn checkpoint(mut self, checkpoint: CheckpointStore) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Actively probe replicas that report an address.
    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> Controller {
        let scaled = Arc::new(Notify::new());
        let notify = scaled.clone();
        let on_scale: ScaleCallback = Arc::new(
            move |id: DeploymentId,
                  target: u32|
                  -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
                debug!(deployment = %id, target, "scale committed; waking controller");
                notify.notify_one();
                Box::pin(async { Ok(()) })
            },
        );
        let autoscaler = Autoscaler::new(self.metrics.clone()).with_callback(on_scale);

        let (monitor, health_rx) = match self.probe {
            Some(probe) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let on_result: HealthCallback = Arc::new(
                    move |report: HealthReport| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                        let tx = tx.clone();
                        Box::pin(async move {
                            let _ = tx.send(report);
                        })
                    },
                );
                (Some(HealthMonitor::new(probe).with_callback(on_result)), Some(rx))
            }
            None => (None, None),
        };

        let reconciler = VersionReconciler::new(RollingConfig::new(self.config.rollout_batch_size));

        Controller {
            inner: Arc::new(Inner {
                store: self.store,
                checkpoint: self.checkpoint,
                metrics: self.metrics,
                autoscaler,
                reconciler,
                monitor,
                config: self.config,
                state: Mutex::new(ControlState::default()),
                health_rx: Mutex::new(health_rx),
                scaled,
            }),
        }
    }
}

impl Controller {
    pub fn builder(store: VersionedKeyStore, metrics: MetricsAggregator) -> ControllerBuilder {
        ControllerBuilder {
            store,
            metrics,
            config: ControlConfig::default(),
            checkpoint: None,
            probe: None,
        }
    }

    pub fn store(&self) -> &VersionedKeyStore {
        &self.inner.store
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.inner.metrics
    }

    pub fn autoscaler(&self) -> &Autoscaler {
        &self.inner.autoscaler
    }

    // ── Applications ──────────────────────────────────────────────

    /// Accept a submission. Validation happens before any state changes;
    /// deployments missing from a resubmission are drained and removed.
    pub async fn deploy_application(
        &self,
        declaration: ApplicationDeclaration,
        now: Timestamp,
    ) -> ControllerResult<()> {
        declaration.validate()?;

        {
            let mut state = self.inner.state.lock().await;
            if let Some(existing) = state.applications.get(&declaration.name)
                && existing.state_machine.status() == ApplicationStatus::Deleting
            {
                return Err(ControllerError::Deleting(declaration.name.clone()));
            }

            let app = state
                .applications
                .entry(declaration.name.clone())
                .or_insert_with(|| ApplicationEntry::new(&declaration));
            let ingress = declaration.ingress_name();
            let start_time_ms = (now * 1000.0) as u64;

            let mut declared = BTreeSet::new();
            for deployment in &declaration.deployments {
                declared.insert(deployment.name.clone());
                let id = DeploymentId::new(&declaration.name, &deployment.name);
                let route_prefix = if ingress == Some(deployment.name.as_str()) {
                    declaration.route_prefix.clone()
                } else {
                    None
                };
                let info = DeploymentInfo::new(
                    id.clone(),
                    deployment.config.clone(),
                    deployment.replica_config.clone(),
                    route_prefix,
                    start_time_ms,
                );

                let running = app
                    .deployments
                    .get(&deployment.name)
                    .map_or(0, DeploymentEntry::running_count);
                let target = match &deployment.config.autoscaling_config {
                    Some(autoscaling) => {
                        self.inner
                            .autoscaler
                            .start(&id, autoscaling.clone(), running)
                            .await?
                    }
                    None => {
                        self.inner.autoscaler.stop(&id).await;
                        deployment.config.num_replicas
                    }
                };

                match app.deployments.get_mut(&deployment.name) {
                    Some(entry) => entry.resubmit(info, target),
                    None => {
                        app.deployments.insert(
                            deployment.name.clone(),
                            DeploymentEntry::new(info, target, self.inner.config.max_replica_start_failures),
                        );
                    }
                }
                debug!(deployment = %id, target, "deployment declared");
            }

            for (name, entry) in app.deployments.iter_mut() {
                if !declared.contains(name) && !entry.deleting {
                    entry.deleting = true;
                    self.inner.autoscaler.stop(entry.id()).await;
                    info!(deployment = %entry.id(), "deployment removed from application; draining");
                }
            }

            app.declaration = declaration.clone();
            app.state_machine.deploy(now);
        }

        if let Some(checkpoint) = &self.inner.checkpoint {
            checkpoint.put_application(&declaration)?;
        }
        info!(
            app = %declaration.name,
            deployments = declaration.deployments.len(),
            "application submitted"
        );

        self.reconcile_all(now).await;
        Ok(())
    }

    /// Begin deleting an application. Its replicas are drained and the
    /// application disappears once none remain.
    pub async fn delete_application(&self, name: &str, now: Timestamp) -> ControllerResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            let app = state
                .applications
                .get_mut(name)
                .ok_or_else(|| ControllerError::UnknownApplication(name.to_string()))?;
            app.state_machine.delete();
            for entry in app.deployments.values_mut() {
                entry.deleting = true;
                self.inner.autoscaler.stop(entry.id()).await;
            }
        }
        info!(app = %name, "application deletion requested");

        self.reconcile_all(now).await;
        Ok(())
    }

    pub async fn list_applications(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state.applications.keys().cloned().collect()
    }

    pub async fn status(&self, name: &str) -> ControllerResult<StatusOverview> {
        let state = self.inner.state.lock().await;
        let app = state
            .applications
            .get(name)
            .ok_or_else(|| ControllerError::UnknownApplication(name.to_string()))?;
        Ok(StatusOverview {
            name: name.to_string(),
            app_status: app.state_machine.info(),
            deployment_statuses: app.deployment_statuses(),
        })
    }

    /// Redeploy every checkpointed application. Returns how many were
    /// recovered; failures are logged and skipped.
    pub async fn recover(&self) -> ControllerResult<usize> {
        let Some(checkpoint) = &self.inner.checkpoint else {
            return Ok(0);
        };

        let mut recovered = 0;
        for declaration in checkpoint.list_applications()? {
            let name = declaration.name.clone();
            match self.deploy_application(declaration, now_secs()).await {
                Ok(()) => recovered += 1,
                Err(e) => warn!(app = %name, error = %e, "failed to recover application"),
            }
        }
        info!(recovered, "applications recovered from checkpoint");
        Ok(recovered)
    }

    // ── Reports ───────────────────────────────────────────────────

    /// Apply a lifecycle report from a replica manager.
    pub async fn report_replica(&self, event: ReplicaEvent, now: Timestamp) -> ControllerResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            let entry = state.deployment_mut(&event.deployment)?;
            let unknown = || ControllerError::UnknownReplica {
                deployment: event.deployment.clone(),
                replica: event.replica_id.clone(),
            };
            let replica = event.replica_id.as_str();

            match event.kind {
                ReplicaEventKind::Started { address } => {
                    let slot = entry.replica_mut(replica).ok_or_else(unknown)?;
                    if slot.phase == ReplicaPhase::Stopping {
                        debug!(%replica, "replica started after being asked to stop");
                    } else {
                        slot.phase = ReplicaPhase::Running {
                            address: address.clone(),
                        };
                        let version = slot.version.clone();
                        entry.state_machine.replica_started(replica, version, now);
                        info!(deployment = %event.deployment, %replica, "replica running");

                        if let (Some(monitor), Some(address)) = (&self.inner.monitor, address) {
                            let config = &entry.info.deployment_config;
                            let schedule = ProbeSchedule::from_secs(
                                config.health_check_period_s,
                                config.health_check_timeout_s,
                            );
                            monitor
                                .start_monitor(&event.deployment, replica, &address, schedule)
                                .await;
                        }
                    }
                }
                ReplicaEventKind::Stopped => {
                    entry.remove_replica(replica).ok_or_else(unknown)?;
                    entry.state_machine.replica_stopped(replica);
                    self.inner.metrics.remove_replica(&event.deployment, replica).await;
                    if let Some(monitor) = &self.inner.monitor {
                        monitor.stop_monitor(replica).await;
                    }
                    info!(deployment = %event.deployment, %replica, "replica stopped");
                }
                ReplicaEventKind::StartFailed { error } => {
                    entry.remove_replica(replica).ok_or_else(unknown)?;
                    entry.state_machine.replica_start_failed(replica, &error);
                }
                ReplicaEventKind::HealthCheck { result } => {
                    entry.replica_mut(replica).ok_or_else(unknown)?;
                    if entry.state_machine.record_health(replica, result, now).is_none() {
                        debug!(%replica, ?result, "health result for a replica that is not running");
                    }
                }
            }
        }

        self.reconcile_all(now).await;
        Ok(())
    }

    /// Record an in-flight request sample for a declared deployment.
    pub async fn record_load(&self, sample: LoadSample, now: Timestamp) -> ControllerResult<()> {
        {
            let state = self.inner.state.lock().await;
            state.deployment(&sample.deployment)?;
        }
        self.inner
            .metrics
            .record(
                &sample.deployment,
                &sample.replica_id,
                sample.in_flight,
                sample.timestamp.unwrap_or(now),
            )
            .await?;
        Ok(())
    }

    /// Load of every declared deployment, for exposition.
    pub async fn load_reports(&self, now: Timestamp) -> Vec<LoadReport> {
        let targets: Vec<(DeploymentId, f64, u32)> = {
            let state = self.inner.state.lock().await;
            state
                .applications
                .values()
                .flat_map(|app| app.deployments.values())
                .map(|d| {
                    let window = d
                        .info
                        .deployment_config
                        .autoscaling_config
                        .as_ref()
                        .map_or(DEFAULT_LOAD_WINDOW_S, |a| a.look_back_period_s);
                    (d.id().clone(), window, d.target_replicas)
                })
                .collect()
        };

        let mut reports = Vec::with_capacity(targets.len());
        for (deployment, window, target_replicas) in targets {
            let load = self.inner.metrics.load(&deployment, window, now).await;
            reports.push(LoadReport {
                deployment,
                average_in_flight: load.average_in_flight,
                reporting_replicas: load.reporting_replicas,
                target_replicas,
            });
        }
        reports
    }

    // ── Reconciliation ────────────────────────────────────────────

    /// One pass over every deployment. A failure in one deployment is
    /// logged and does not stop the others.
    pub async fn reconcile_all(&self, now: Timestamp) {
        let mut state = self.inner.state.lock().await;
        let mut finished = Vec::new();

        for (name, app) in state.applications.iter_mut() {
            let mut drained = Vec::new();
            for (deployment_name, entry) in app.deployments.iter_mut() {
                if let Err(e) = self.reconcile_deployment(entry).await {
                    warn!(deployment = %entry.id(), error = %e, "reconcile failed");
                }
                if entry.deleting && entry.replicas.is_empty() {
                    drained.push(deployment_name.clone());
                }
            }
            for deployment_name in drained {
                if let Some(entry) = app.deployments.remove(&deployment_name) {
                    self.teardown_deployment(entry.id()).await;
                }
            }

            let statuses = app.deployment_statuses();
            app.state_machine.update(&statuses);
            if app.state_machine.status() == ApplicationStatus::Deleting && app.deployments.is_empty() {
                finished.push(name.clone());
            }
        }

        for name in finished {
            state.applications.remove(&name);
            if let Some(checkpoint) = &self.inner.checkpoint
                && let Err(e) = checkpoint.delete_application(&name)
            {
                warn!(app = %name, error = %e, "failed to remove checkpoint");
            }
            info!(app = %name, "application deleted");
        }

        let endpoints: EndpointSet = state
            .applications
            .values()
            .filter(|app| app.state_machine.status() != ApplicationStatus::Deleting)
            .filter_map(ApplicationEntry::endpoint)
            .collect();
        if let Err(e) = self.inner.store.put_json_if_changed(keys::ENDPOINTS, &endpoints) {
            warn!(error = %e, "failed to publish endpoints");
        }
        debug!(now, applications = state.applications.len(), "reconcile pass complete");
    }

    async fn reconcile_deployment(&self, entry: &mut DeploymentEntry) -> ControllerResult<()> {
        let id = entry.id().clone();

        if entry.is_autoscaled()
            && !entry.deleting
            && let Some(desired) = self.inner.autoscaler.desired_replicas(&id).await
            && desired != entry.target_replicas
        {
            info!(deployment = %id, from = entry.target_replicas, to = desired, "applying autoscaled target");
            entry.set_target(desired);
        }

        for replica in entry.state_machine.unhealthy_replicas() {
            if let Some(slot) = entry.replica_mut(&replica)
                && slot.phase != ReplicaPhase::Stopping
            {
                warn!(deployment = %id, %replica, "replacing unhealthy replica");
                slot.phase = ReplicaPhase::Stopping;
            }
        }

        let plan = self
            .inner
            .reconciler
            .reconcile(&entry.live_replicas(), &entry.desired_state());
        entry.apply(&plan);
        entry.state_machine.evaluate();

        if entry.is_autoscaled()
            && !entry.deleting
            && let Err(e) = self
                .inner
                .autoscaler
                .set_current_replicas(&id, entry.running_count())
                .await
        {
            debug!(deployment = %id, error = %e, "autoscaler not tracking deployment");
        }

        let store = &self.inner.store;
        if !entry.deleting {
            store.put_json_if_changed(&keys::deployment_config(&id), &entry.info)?;
        }
        store.put_json_if_changed(&keys::replica_assignments(&id), &entry.assignments())?;
        store.put_json_if_changed(&keys::running_replicas(&id), &entry.running_replicas())?;
        Ok(())
    }

    async fn teardown_deployment(&self, id: &DeploymentId) {
        for key in keys::deployment_keys(id) {
            self.inner.store.delete(&key);
        }
        self.inner.metrics.remove_deployment(id).await;
        self.inner.autoscaler.stop(id).await;
        if let Some(monitor) = &self.inner.monitor {
            monitor.stop_deployment(id).await;
        }
        info!(deployment = %id, "deployment removed");
    }

    /// Run until `shutdown` flips: reconcile every `interval`, on every
    /// committed autoscaling decision, and apply probe results as they
    /// arrive.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut health_rx = self.inner.health_rx.lock().await.take();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs_f64(), "controller loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = now_secs();
                    self.inner.metrics.prune(now).await;
                    self.reconcile_all(now).await;
                }
                _ = self.inner.scaled.notified() => {
                    self.reconcile_all(now_secs()).await;
                }
                Some(report) = next_report(&mut health_rx) => {
                    let now = report.timestamp;
                    if let Err(e) = self.report_replica(report.into(), now).await {
                        debug!(error = %e, "dropping probe result");
                    }
                }
                _ = shutdown.changed() => {
                    info!("controller loop shutting down");
                    break;
                }
            }
        }

        self.inner.autoscaler.stop_all().await;
        if let Some(monitor) = &self.inner.monitor {
            monitor.stop_all().await;
        }
    }
}

async fn next_report(
    rx: &mut Option<mpsc::UnboundedReceiver<HealthReport>>,
) -> Option<HealthReport> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
