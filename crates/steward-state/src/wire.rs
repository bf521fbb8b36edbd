//! Protobuf wire messages exchanged with cross-language clients.
//!
//! Messages are derived by hand with `prost` so no code generation step is
//! needed. Field tags are part of the wire contract and must never be
//! reused. Status enums share the domain types' discriminants.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::ValidationError;
use crate::types::{self, ApplicationStatus, DeploymentLanguage, DeploymentStatus};

#[derive(Clone, PartialEq, prost::Message)]
pub struct LongPollRequest {
    #[prost(map = "string, int32", tag = "1")]
    pub keys_to_snapshot_ids: HashMap<String, i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdatedObject {
    #[prost(bytes = "bytes", tag = "1")]
    pub object_snapshot: Bytes,
    #[prost(int32, tag = "2")]
    pub snapshot_id: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LongPollResult {
    #[prost(map = "string, message", tag = "1")]
    pub updated_objects: HashMap<String, UpdatedObject>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AutoscalingConfig {
    #[prost(int32, tag = "1")]
    pub min_replicas: i32,
    #[prost(int32, tag = "2")]
    pub max_replicas: i32,
    #[prost(double, tag = "3")]
    pub target_num_ongoing_requests_per_replica: f64,
    #[prost(double, tag = "4")]
    pub metrics_interval_s: f64,
    #[prost(double, tag = "5")]
    pub look_back_period_s: f64,
    #[prost(double, tag = "6")]
    pub smoothing_factor: f64,
    #[prost(double, tag = "7")]
    pub downscale_delay_s: f64,
    #[prost(double, tag = "8")]
    pub upscale_delay_s: f64,
    #[prost(int32, optional, tag = "9")]
    pub initial_replicas: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeploymentConfig {
    #[prost(int32, tag = "1")]
    pub num_replicas: i32,
    #[prost(int32, tag = "2")]
    pub max_concurrent_queries: i32,
    #[prost(bytes = "bytes", tag = "3")]
    pub user_config: Bytes,
    #[prost(double, tag = "4")]
    pub graceful_shutdown_wait_loop_s: f64,
    #[prost(double, tag = "5")]
    pub graceful_shutdown_timeout_s: f64,
    #[prost(double, tag = "6")]
    pub health_check_period_s: f64,
    #[prost(double, tag = "7")]
    pub health_check_timeout_s: f64,
    #[prost(bool, tag = "8")]
    pub is_cross_language: bool,
    #[prost(enumeration = "DeploymentLanguage", tag = "9")]
    pub deployment_language: i32,
    #[prost(message, optional, tag = "10")]
    pub autoscaling_config: Option<AutoscalingConfig>,
    #[prost(string, tag = "11")]
    pub version: String,
    #[prost(string, repeated, tag = "12")]
    pub user_configured_option_names: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeploymentStatusInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "DeploymentStatus", tag = "2")]
    pub status: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApplicationStatusInfo {
    #[prost(enumeration = "ApplicationStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(double, tag = "3")]
    pub deployment_timestamp: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StatusOverview {
    #[prost(message, optional, tag = "1")]
    pub app_status: Option<ApplicationStatusInfo>,
    #[prost(message, repeated, tag = "2")]
    pub deployment_statuses: Vec<DeploymentStatusInfo>,
    #[prost(string, tag = "3")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListApplicationsResponse {
    #[prost(string, repeated, tag = "1")]
    pub application_names: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthzResponse {
    #[prost(string, tag = "1")]
    pub message: String,
}

// ── Conversions ───────────────────────────────────────────────────

impl From<types::UpdatedObject> for UpdatedObject {
    fn from(object: types::UpdatedObject) -> Self {
        Self {
            object_snapshot: object.object_snapshot,
            snapshot_id: object.snapshot_id,
        }
    }
}

impl From<HashMap<String, types::UpdatedObject>> for LongPollResult {
    fn from(updated: HashMap<String, types::UpdatedObject>) -> Self {
        Self {
            updated_objects: updated
                .into_iter()
                .map(|(key, object)| (key, object.into()))
                .collect(),
        }
    }
}

impl From<UpdatedObject> for types::UpdatedObject {
    fn from(object: UpdatedObject) -> Self {
        Self {
            object_snapshot: object.object_snapshot,
            snapshot_id: object.snapshot_id,
        }
    }
}

impl LongPollResult {
    pub fn into_updated_objects(self) -> HashMap<String, types::UpdatedObject> {
        self.updated_objects
            .into_iter()
            .map(|(key, object)| (key, object.into()))
            .collect()
    }
}

impl From<&types::AutoscalingConfig> for AutoscalingConfig {
    fn from(config: &types::AutoscalingConfig) -> Self {
        Self {
            min_replicas: saturating_i32(config.min_replicas),
            max_replicas: saturating_i32(config.max_replicas),
            target_num_ongoing_requests_per_replica: config.target_num_ongoing_requests_per_replica,
            metrics_interval_s: config.metrics_interval_s,
            look_back_period_s: config.look_back_period_s,
            smoothing_factor: config.smoothing_factor,
            downscale_delay_s: config.downscale_delay_s,
            upscale_delay_s: config.upscale_delay_s,
            initial_replicas: config.initial_replicas.map(saturating_i32),
        }
    }
}

impl TryFrom<AutoscalingConfig> for types::AutoscalingConfig {
    type Error = ValidationError;

    fn try_from(wire: AutoscalingConfig) -> Result<Self, Self::Error> {
        let config = Self {
            min_replicas: non_negative("min_replicas", wire.min_replicas)?,
            max_replicas: non_negative("max_replicas", wire.max_replicas)?,
            target_num_ongoing_requests_per_replica: wire.target_num_ongoing_requests_per_replica,
            metrics_interval_s: wire.metrics_interval_s,
            look_back_period_s: wire.look_back_period_s,
            smoothing_factor: wire.smoothing_factor,
            downscale_delay_s: wire.downscale_delay_s,
            upscale_delay_s: wire.upscale_delay_s,
            initial_replicas: wire
                .initial_replicas
                .map(|n| non_negative("initial_replicas", n))
                .transpose()?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<&types::DeploymentConfig> for DeploymentConfig {
    fn from(config: &types::DeploymentConfig) -> Self {
        Self {
            num_replicas: saturating_i32(config.num_replicas),
            max_concurrent_queries: saturating_i32(config.max_concurrent_queries),
            user_config: config
                .user_config
                .as_ref()
                .map(|value| Bytes::from(value.to_string()))
                .unwrap_or_default(),
            graceful_shutdown_wait_loop_s: config.graceful_shutdown_wait_loop_s,
            graceful_shutdown_timeout_s: config.graceful_shutdown_timeout_s,
            health_check_period_s: config.health_check_period_s,
            health_check_timeout_s: config.health_check_timeout_s,
            is_cross_language: config.is_cross_language,
            deployment_language: config.deployment_language.into(),
            autoscaling_config: config.autoscaling_config.as_ref().map(Into::into),
            version: config.version.clone().unwrap_or_default(),
            user_configured_option_names: config
                .user_configured_option_names
                .iter()
                .cloned()
                .collect(),
        }
    }
}

impl TryFrom<DeploymentConfig> for types::DeploymentConfig {
    type Error = ValidationError;

    fn try_from(wire: DeploymentConfig) -> Result<Self, Self::Error> {
        let user_config = if wire.user_config.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&wire.user_config).map_err(|e| {
                ValidationError::Invalid(format!("user_config is not valid JSON: {e}"))
            })?)
        };
        let deployment_language = DeploymentLanguage::try_from(wire.deployment_language).map_err(
            |_| ValidationError::UnknownEnumValue {
                field: "deployment_language",
                value: wire.deployment_language,
            },
        )?;
        let config = Self {
            num_replicas: non_negative("num_replicas", wire.num_replicas)?,
            max_concurrent_queries: non_negative(
                "max_concurrent_queries",
                wire.max_concurrent_queries,
            )?,
            user_config,
            graceful_shutdown_wait_loop_s: wire.graceful_shutdown_wait_loop_s,
            graceful_shutdown_timeout_s: wire.graceful_shutdown_timeout_s,
            health_check_period_s: wire.health_check_period_s,
            health_check_timeout_s: wire.health_check_timeout_s,
            is_cross_language: wire.is_cross_language,
            deployment_language,
            autoscaling_config: wire.autoscaling_config.map(TryInto::try_into).transpose()?,
            version: (!wire.version.is_empty()).then_some(wire.version),
            user_configured_option_names: wire.user_configured_option_names.into_iter().collect(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<&types::DeploymentStatusInfo> for DeploymentStatusInfo {
    fn from(info: &types::DeploymentStatusInfo) -> Self {
        Self {
            name: info.name.clone(),
            status: info.status.into(),
            message: info.message.clone(),
        }
    }
}

impl From<&types::ApplicationStatusInfo> for ApplicationStatusInfo {
    fn from(info: &types::ApplicationStatusInfo) -> Self {
        Self {
            status: info.status.into(),
            message: info.message.clone(),
            deployment_timestamp: info.deployment_timestamp,
        }
    }
}

impl From<&types::StatusOverview> for StatusOverview {
    fn from(overview: &types::StatusOverview) -> Self {
        Self {
            app_status: Some((&overview.app_status).into()),
            deployment_statuses: overview.deployment_statuses.iter().map(Into::into).collect(),
            name: overview.name.clone(),
        }
    }
}

fn saturating_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn non_negative(field: &'static str, value: i32) -> Result<u32, ValidationError> {
    u32::try_from(value).map_err(|_| ValidationError::Negative(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn long_poll_result_decodes_what_it_encodes() {
        let updated = HashMap::from([(
            "endpoints".to_string(),
            types::UpdatedObject {
                object_snapshot: Bytes::from_static(b"{}"),
                snapshot_id: 7,
            },
        )]);
        let result = LongPollResult::from(updated);
        let decoded = LongPollResult::decode(result.encode_to_vec().as_slice()).unwrap();

        assert_eq!(decoded.updated_objects["endpoints"].snapshot_id, 7);
        assert_eq!(
            decoded.updated_objects["endpoints"].object_snapshot,
            Bytes::from_static(b"{}")
        );
    }

    #[test]
    fn negative_bounds_are_rejected() {
        let wire = AutoscalingConfig {
            min_replicas: -1,
            max_replicas: 3,
            ..AutoscalingConfig::from(&types::AutoscalingConfig::default())
        };
        let err = types::AutoscalingConfig::try_from(wire).unwrap_err();
        assert_eq!(err, ValidationError::Negative("min_replicas"));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let wire = AutoscalingConfig {
            min_replicas: 5,
            max_replicas: 2,
            ..AutoscalingConfig::from(&types::AutoscalingConfig::default())
        };
        assert_eq!(
            types::AutoscalingConfig::try_from(wire).unwrap_err(),
            ValidationError::ReplicaBounds { min: 5, max: 2 }
        );
    }

    #[test]
    fn deployment_config_converts_both_ways() {
        let config = types::DeploymentConfig {
            user_config: Some(serde_json::json!({"threshold": 0.5})),
            deployment_language: DeploymentLanguage::Java,
            is_cross_language: true,
            version: Some("v3".to_string()),
            autoscaling_config: Some(types::AutoscalingConfig::new(1, 4, 2.0).unwrap()),
            ..Default::default()
        };
        let wire = DeploymentConfig::from(&config);
        assert_eq!(wire.deployment_language, 1);

        let bytes = wire.encode_to_vec();
        let back = types::DeploymentConfig::try_from(DeploymentConfig::decode(bytes.as_slice()).unwrap())
            .unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn unknown_language_is_rejected() {
        let mut wire = DeploymentConfig::from(&types::DeploymentConfig::default());
        wire.deployment_language = 42;
        assert!(matches!(
            types::DeploymentConfig::try_from(wire),
            Err(ValidationError::UnknownEnumValue { value: 42, .. })
        ));
    }

    #[test]
    fn status_overview_uses_stable_integers() {
        let overview = types::StatusOverview {
            name: "shop".to_string(),
            app_status: types::ApplicationStatusInfo {
                status: ApplicationStatus::Unhealthy,
                message: "ranker unhealthy".to_string(),
                deployment_timestamp: 10.0,
            },
            deployment_statuses: vec![types::DeploymentStatusInfo {
                name: "ranker".to_string(),
                status: DeploymentStatus::Unhealthy,
                message: String::new(),
            }],
        };
        let wire = StatusOverview::from(&overview);
        assert_eq!(wire.app_status.as_ref().unwrap().status, 6);
        assert_eq!(wire.deployment_statuses[0].status, 2);
        assert_eq!(wire.deployment_statuses[0].status(), DeploymentStatus::Unhealthy);
    }
}
