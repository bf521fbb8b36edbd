//! Domain types for the Steward control plane.
//!
//! Configuration types are validated at submission time; status enums use
//! stable integer discriminants so they encode identically in JSON, protobuf
//! and across client languages.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Per-key change counter.
pub type SnapshotId = i32;

/// Snapshot id a subscriber sends for a key it has never observed.
pub const UNSEEN_SNAPSHOT_ID: SnapshotId = -1;

/// Seconds since the Unix epoch.
pub type Timestamp = f64;

/// Identifier of a single replica, unique within the control plane.
pub type ReplicaId = String;

/// Current wall-clock time as a [`Timestamp`].
pub fn now_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Identifiers ───────────────────────────────────────────────────

/// A deployment is addressed by its owning application and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentId {
    pub app: String,
    pub name: String,
}

impl DeploymentId {
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app, self.name)
    }
}

impl FromStr for DeploymentId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((app, name)) if !app.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(app, name))
            }
            _ => Err(ValidationError::Invalid(format!(
                "deployment id must look like <app>/<name>, got {s:?}"
            ))),
        }
    }
}

// ── Long poll values ──────────────────────────────────────────────

/// The materialized value of a key at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedObject {
    pub object_snapshot: Bytes,
    pub snapshot_id: SnapshotId,
}

// ── Configuration ─────────────────────────────────────────────────

/// Language a deployment's replicas are implemented in.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, prost::Enumeration,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum DeploymentLanguage {
    Python = 0,
    Java = 1,
}

/// Autoscaling parameters for a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalingConfig {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_num_ongoing_requests_per_replica: f64,
    /// Control tick period.
    pub metrics_interval_s: f64,
    /// Window over which replica samples are averaged.
    pub look_back_period_s: f64,
    /// Fraction of the gap to the raw target closed per tick, in (0, 1].
    pub smoothing_factor: f64,
    pub downscale_delay_s: f64,
    pub upscale_delay_s: f64,
    pub initial_replicas: Option<u32>,
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 1,
            target_num_ongoing_requests_per_replica: 1.0,
            metrics_interval_s: 10.0,
            look_back_period_s: 30.0,
            smoothing_factor: 1.0,
            downscale_delay_s: 600.0,
            upscale_delay_s: 30.0,
            initial_replicas: None,
        }
    }
}

impl AutoscalingConfig {
    /// Build a validated config with default timing parameters.
    pub fn new(min_replicas: u32, max_replicas: u32, target: f64) -> Result<Self, ValidationError> {
        let config = Self {
            min_replicas,
            max_replicas,
            target_num_ongoing_requests_per_replica: target,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_replicas > self.max_replicas {
            return Err(ValidationError::ReplicaBounds {
                min: self.min_replicas,
                max: self.max_replicas,
            });
        }
        require_positive(
            "target_num_ongoing_requests_per_replica",
            self.target_num_ongoing_requests_per_replica,
        )?;
        require_duration("metrics_interval_s", self.metrics_interval_s)?;
        require_positive("look_back_period_s", self.look_back_period_s)?;
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return Err(ValidationError::OutOfRange {
                field: "smoothing_factor",
                requirement: "in (0, 1]",
                value: self.smoothing_factor,
            });
        }
        require_non_negative("downscale_delay_s", self.downscale_delay_s)?;
        require_non_negative("upscale_delay_s", self.upscale_delay_s)?;
        if let Some(initial) = self.initial_replicas
            && (initial < self.min_replicas || initial > self.max_replicas)
        {
            return Err(ValidationError::Invalid(format!(
                "initial_replicas ({initial}) must be within [{}, {}]",
                self.min_replicas, self.max_replicas
            )));
        }
        Ok(())
    }

    /// Replica count used when a deployment is first created.
    pub fn initial_target(&self) -> u32 {
        self.initial_replicas.unwrap_or(self.min_replicas)
    }

    pub fn clamp(&self, replicas: u32) -> u32 {
        replicas.clamp(self.min_replicas, self.max_replicas)
    }
}

/// Option name recorded in `user_configured_option_names` when the user
/// explicitly sets `num_replicas`.
pub const NUM_REPLICAS_OPTION: &str = "num_replicas";

/// Per-deployment configuration as submitted by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub num_replicas: u32,
    pub max_concurrent_queries: u32,
    /// Reconfigure payload delivered to replicas without restarting them.
    pub user_config: Option<serde_json::Value>,
    pub graceful_shutdown_wait_loop_s: f64,
    pub graceful_shutdown_timeout_s: f64,
    pub health_check_period_s: f64,
    pub health_check_timeout_s: f64,
    pub is_cross_language: bool,
    pub deployment_language: DeploymentLanguage,
    pub autoscaling_config: Option<AutoscalingConfig>,
    pub version: Option<String>,
    pub user_configured_option_names: BTreeSet<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            num_replicas: 1,
            max_concurrent_queries: 100,
            user_config: None,
            graceful_shutdown_wait_loop_s: 2.0,
            graceful_shutdown_timeout_s: 20.0,
            health_check_period_s: 10.0,
            health_check_timeout_s: 30.0,
            is_cross_language: false,
            deployment_language: DeploymentLanguage::Python,
            autoscaling_config: None,
            version: None,
            user_configured_option_names: BTreeSet::new(),
        }
    }
}

impl DeploymentConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_queries == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_queries",
                requirement: "positive",
                value: 0.0,
            });
        }
        require_non_negative("graceful_shutdown_wait_loop_s", self.graceful_shutdown_wait_loop_s)?;
        require_non_negative("graceful_shutdown_timeout_s", self.graceful_shutdown_timeout_s)?;
        require_duration("health_check_period_s", self.health_check_period_s)?;
        require_duration("health_check_timeout_s", self.health_check_timeout_s)?;
        if let Some(autoscaling) = &self.autoscaling_config {
            if self.is_user_configured(NUM_REPLICAS_OPTION) {
                return Err(ValidationError::Invalid(
                    "num_replicas cannot be set when autoscaling_config is provided".to_string(),
                ));
            }
            autoscaling.validate()?;
        }
        Ok(())
    }

    pub fn is_user_configured(&self, option: &str) -> bool {
        self.user_configured_option_names.contains(option)
    }

    /// Target replica count at creation time.
    pub fn initial_replicas(&self) -> u32 {
        match &self.autoscaling_config {
            Some(autoscaling) => autoscaling.initial_target(),
            None => self.num_replicas,
        }
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_nan() || value <= 0.0 {
        return Err(ValidationError::OutOfRange {
            field,
            requirement: "positive",
            value,
        });
    }
    Ok(())
}

/// Positive and small enough to drive a timer.
fn require_duration(field: &'static str, value: f64) -> Result<(), ValidationError> {
    require_positive(field, value)?;
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(ValidationError::OutOfRange {
            field,
            requirement: "a representable duration",
            value,
        });
    }
    Ok(())
}

fn require_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_nan() || value < 0.0 {
        return Err(ValidationError::Negative(field));
    }
    Ok(())
}

/// Placement group scheduling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementStrategy {
    Pack,
    Spread,
    StrictPack,
    StrictSpread,
}

/// The deployable unit: code reference, init arguments, and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Import path or artifact reference of the deployment's code.
    pub deployment_def: String,
    #[serde(default)]
    pub init_args: Option<serde_json::Value>,
    #[serde(default)]
    pub actor_options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub placement_group_bundles: Option<Vec<BTreeMap<String, f64>>>,
    #[serde(default)]
    pub placement_group_strategy: Option<PlacementStrategy>,
}

impl ReplicaConfig {
    pub fn new(deployment_def: impl Into<String>) -> Self {
        Self {
            deployment_def: deployment_def.into(),
            init_args: None,
            actor_options: BTreeMap::new(),
            placement_group_bundles: None,
            placement_group_strategy: None,
        }
    }

    /// Content hash of the code reference and init args (hex SHA-256).
    pub fn code_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.deployment_def.as_bytes());
        hasher.update([0u8]);
        if let Some(args) = &self.init_args {
            hasher.update(args.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

// ── Versions ──────────────────────────────────────────────────────

/// The restart-relevant subset of a [`DeploymentConfig`].
///
/// Replica counts, autoscaling parameters and the reconfigure payload are
/// excluded: changing them never requires replacing a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub max_concurrent_queries: u32,
    pub graceful_shutdown_wait_loop_s: f64,
    pub graceful_shutdown_timeout_s: f64,
    pub health_check_period_s: f64,
    pub health_check_timeout_s: f64,
    pub is_cross_language: bool,
    pub deployment_language: DeploymentLanguage,
}

impl From<&DeploymentConfig> for ResolvedConfig {
    fn from(config: &DeploymentConfig) -> Self {
        Self {
            max_concurrent_queries: config.max_concurrent_queries,
            graceful_shutdown_wait_loop_s: config.graceful_shutdown_wait_loop_s,
            graceful_shutdown_timeout_s: config.graceful_shutdown_timeout_s,
            health_check_period_s: config.health_check_period_s,
            health_check_timeout_s: config.health_check_timeout_s,
            is_cross_language: config.is_cross_language,
            deployment_language: config.deployment_language,
        }
    }
}

/// Identity of a deployable artifact. Two versions are equal iff every
/// field matches; running replicas whose version differs from the target
/// must be replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVersion {
    pub code_version: String,
    pub resolved_config: ResolvedConfig,
    pub actor_options: BTreeMap<String, serde_json::Value>,
    pub placement_group_bundles: Option<Vec<BTreeMap<String, f64>>>,
    pub placement_group_strategy: Option<PlacementStrategy>,
}

impl DeploymentVersion {
    /// Derive the version of a submission. Without an explicit `version`
    /// the code version is the content hash of the replica config.
    pub fn new(config: &DeploymentConfig, replica_config: &ReplicaConfig) -> Self {
        Self {
            code_version: config
                .version
                .clone()
                .unwrap_or_else(|| replica_config.code_hash()),
            resolved_config: ResolvedConfig::from(config),
            actor_options: replica_config.actor_options.clone(),
            placement_group_bundles: replica_config.placement_group_bundles.clone(),
            placement_group_strategy: replica_config.placement_group_strategy,
        }
    }
}

/// Runtime metadata for a declared deployment. Replaced wholesale when a
/// new submission arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub id: DeploymentId,
    pub deployment_config: DeploymentConfig,
    pub replica_config: ReplicaConfig,
    pub version: DeploymentVersion,
    pub route_prefix: Option<String>,
    /// Unix timestamp (milliseconds) when this info was created.
    pub start_time_ms: u64,
    /// Unix timestamp (milliseconds) when the deployment was torn down.
    pub end_time_ms: Option<u64>,
}

impl DeploymentInfo {
    pub fn new(
        id: DeploymentId,
        deployment_config: DeploymentConfig,
        replica_config: ReplicaConfig,
        route_prefix: Option<String>,
        start_time_ms: u64,
    ) -> Self {
        let version = DeploymentVersion::new(&deployment_config, &replica_config);
        Self {
            id,
            deployment_config,
            replica_config,
            version,
            route_prefix,
            start_time_ms,
            end_time_ms: None,
        }
    }
}

// ── Declarations ──────────────────────────────────────────────────

/// One deployment inside an application submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDeclaration {
    pub name: String,
    #[serde(default)]
    pub config: DeploymentConfig,
    pub replica_config: ReplicaConfig,
}

/// An application submission: deployments deployed and versioned together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDeclaration {
    pub name: String,
    #[serde(default)]
    pub route_prefix: Option<String>,
    /// Deployment receiving routed traffic. Defaults to the only deployment.
    #[serde(default)]
    pub ingress: Option<String>,
    pub deployments: Vec<DeploymentDeclaration>,
}

impl ApplicationDeclaration {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("application name", &self.name)?;
        if self.deployments.is_empty() {
            return Err(ValidationError::Invalid(format!(
                "application {:?} declares no deployments",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for deployment in &self.deployments {
            validate_name("deployment name", &deployment.name)?;
            if !seen.insert(deployment.name.as_str()) {
                return Err(ValidationError::Invalid(format!(
                    "duplicate deployment name {:?}",
                    deployment.name
                )));
            }
            if deployment.replica_config.deployment_def.is_empty() {
                return Err(ValidationError::Invalid(format!(
                    "deployment {:?} has an empty deployment_def",
                    deployment.name
                )));
            }
            deployment.config.validate()?;
        }
        if let Some(prefix) = &self.route_prefix {
            if !prefix.starts_with('/') {
                return Err(ValidationError::Invalid(format!(
                    "route_prefix must start with '/', got {prefix:?}"
                )));
            }
            if self.ingress_name().is_none() {
                return Err(ValidationError::Invalid(
                    "route_prefix requires an ingress deployment".to_string(),
                ));
            }
        }
        if let Some(ingress) = &self.ingress
            && !seen.contains(ingress.as_str())
        {
            return Err(ValidationError::Invalid(format!(
                "ingress {ingress:?} is not one of the declared deployments"
            )));
        }
        Ok(())
    }

    /// Name of the ingress deployment, if one can be determined.
    pub fn ingress_name(&self) -> Option<&str> {
        match (&self.ingress, self.deployments.as_slice()) {
            (Some(name), _) => Some(name.as_str()),
            (None, [only]) => Some(only.name.as_str()),
            _ => None,
        }
    }
}

fn validate_name(what: &str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.contains('/') {
        return Err(ValidationError::Invalid(format!(
            "{what} must be non-empty and must not contain '/', got {name:?}"
        )));
    }
    Ok(())
}

// ── Status ────────────────────────────────────────────────────────

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, prost::Enumeration,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum DeploymentStatus {
    Updating = 0,
    Healthy = 1,
    Unhealthy = 2,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, prost::Enumeration,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ApplicationStatus {
    Deploying = 0,
    Running = 1,
    DeployFailed = 2,
    Deleting = 3,
    NotStarted = 5,
    Unhealthy = 6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatusInfo {
    pub name: String,
    pub status: DeploymentStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStatusInfo {
    pub status: ApplicationStatus,
    pub message: String,
    /// Unix timestamp (seconds) of the submission being deployed.
    pub deployment_timestamp: Timestamp,
}

/// Status of an application and all its deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusOverview {
    pub name: String,
    pub app_status: ApplicationStatusInfo,
    pub deployment_statuses: Vec<DeploymentStatusInfo>,
}

// ── Published documents ───────────────────────────────────────────

/// Route and arbitrary config for one externally routable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub route: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Every routable endpoint, keyed by endpoint name. Published under
/// [`crate::keys::ENDPOINTS`].
pub type EndpointSet = BTreeMap<String, EndpointInfo>;

/// What a replica lifecycle manager should do with a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaGoal {
    Running,
    Stopped,
}

/// One replica the lifecycle manager is asked to run (or stop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaAssignment {
    pub replica_id: ReplicaId,
    pub code_version: String,
    pub user_config: Option<serde_json::Value>,
    pub goal: ReplicaGoal,
}

/// Desired replica set for a deployment, published under
/// [`crate::keys::replica_assignments`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaAssignments {
    pub deployment: DeploymentId,
    pub replicas: Vec<ReplicaAssignment>,
}

/// A replica that is running and may receive traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningReplicaInfo {
    pub replica_id: ReplicaId,
    pub address: Option<String>,
    pub max_concurrent_queries: u32,
}

/// Running replicas of a deployment, published under
/// [`crate::keys::running_replicas`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningReplicas {
    pub deployment: DeploymentId,
    pub replicas: Vec<RunningReplicaInfo>,
}
