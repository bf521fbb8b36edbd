//! REST API handlers.
//!
//! Each handler calls into the `Controller` and returns the JSON envelope
//! (or a protobuf message when the client asks for one).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use prost::Message;

use steward_controller::{ControllerError, LoadSample, ReplicaEvent};
use steward_metrics::render_prometheus;
use steward_state::{ApplicationDeclaration, now_secs, wire};

use crate::ApiState;

pub(crate) const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn controller_error(e: &ControllerError) -> Response {
    let status = match e {
        ControllerError::Validation(_) | ControllerError::Metrics(_) => StatusCode::BAD_REQUEST,
        ControllerError::Autoscale(_) => StatusCode::BAD_REQUEST,
        ControllerError::UnknownApplication(_)
        | ControllerError::UnknownDeployment(_)
        | ControllerError::UnknownReplica { .. } => StatusCode::NOT_FOUND,
        ControllerError::Deleting(_) => StatusCode::CONFLICT,
        ControllerError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

pub(crate) fn wants_protobuf(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(PROTOBUF_CONTENT_TYPE))
}

pub(crate) fn protobuf_response(message: &impl Message) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)],
        message.encode_to_vec(),
    )
        .into_response()
}

// ── Applications ───────────────────────────────────────────────

/// GET /api/v1/applications
pub async fn list_applications(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let names = state.controller.list_applications().await;
    if wants_protobuf(&headers) {
        return protobuf_response(&wire::ListApplicationsResponse {
            application_names: names,
        });
    }
    ApiResponse::ok(names).into_response()
}

/// POST /api/v1/applications
pub async fn deploy_application(
    State(state): State<ApiState>,
    Json(declaration): Json<ApplicationDeclaration>,
) -> Response {
    let name = declaration.name.clone();
    match state.controller.deploy_application(declaration, now_secs()).await {
        Ok(()) => (StatusCode::ACCEPTED, ApiResponse::ok(name)).into_response(),
        Err(e) => controller_error(&e),
    }
}

/// DELETE /api/v1/applications/:name
pub async fn delete_application(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    match state.controller.delete_application(&name, now_secs()).await {
        Ok(()) => (StatusCode::ACCEPTED, ApiResponse::ok("deleting")).into_response(),
        Err(e) => controller_error(&e),
    }
}

/// GET /api/v1/applications/:name/status
pub async fn application_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.controller.status(&name).await {
        Ok(overview) if wants_protobuf(&headers) => {
            protobuf_response(&wire::StatusOverview::from(&overview))
        }
        Ok(overview) => ApiResponse::ok(overview).into_response(),
        Err(e) => controller_error(&e),
    }
}

// ── Replica reports ────────────────────────────────────────────

/// POST /api/v1/replicas/events
pub async fn replica_event(
    State(state): State<ApiState>,
    Json(event): Json<ReplicaEvent>,
) -> Response {
    match state.controller.report_replica(event, now_secs()).await {
        Ok(()) => ApiResponse::ok("recorded").into_response(),
        Err(e) => controller_error(&e),
    }
}

/// POST /api/v1/metrics
pub async fn record_load(State(state): State<ApiState>, Json(sample): Json<LoadSample>) -> Response {
    match state.controller.record_load(sample, now_secs()).await {
        Ok(()) => ApiResponse::ok("recorded").into_response(),
        Err(e) => controller_error(&e),
    }
}

// ── Health & Prometheus ────────────────────────────────────────

/// GET /-/healthz
pub async fn healthz(headers: HeaderMap) -> Response {
    let message = "success".to_string();
    if wants_protobuf(&headers) {
        return protobuf_response(&wire::HealthzResponse { message });
    }
    Json(serde_json::json!({ "message": message })).into_response()
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let reports = state.controller.load_reports(now_secs()).await;
    let body = render_prometheus(&reports, state.long_poll.num_waiters());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use http_body_util::BodyExt;

    use steward_controller::{Controller, ReplicaEventKind};
    use steward_core::LongPollConfig;
    use steward_longpoll::LongPollHost;
    use steward_metrics::MetricsAggregator;
    use steward_state::{
        DeploymentConfig, DeploymentDeclaration, DeploymentId, ReplicaConfig, VersionedKeyStore,
    };

    fn test_state() -> ApiState {
        let store = VersionedKeyStore::new();
        let long_poll = LongPollHost::new(store.clone());
        let controller = Controller::builder(store, MetricsAggregator::new(300.0)).build();
        ApiState {
            controller,
            long_poll,
            long_poll_config: LongPollConfig::default(),
        }
    }

    fn declaration() -> ApplicationDeclaration {
        ApplicationDeclaration {
            name: "shop".to_string(),
            route_prefix: Some("/shop".to_string()),
            ingress: None,
            deployments: vec![DeploymentDeclaration {
                name: "ranker".to_string(),
                config: DeploymentConfig::default(),
                replica_config: ReplicaConfig::new("shop.ranker:Ranker"),
            }],
        }
    }

    fn protobuf_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
        headers
    }

    async fn body_bytes(resp: Response) -> bytes::Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn list_applications_empty() {
        let state = test_state();
        let resp = list_applications(State(state), HeaderMap::new()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn deploy_then_list_as_protobuf() {
        let state = test_state();
        let resp = deploy_application(State(state.clone()), Json(declaration())).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = list_applications(State(state), protobuf_headers()).await;
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            PROTOBUF_CONTENT_TYPE
        );
        let decoded = wire::ListApplicationsResponse::decode(body_bytes(resp).await).unwrap();
        assert_eq!(decoded.application_names, vec!["shop".to_string()]);
    }

    #[tokio::test]
    async fn invalid_declaration_is_bad_request() {
        let state = test_state();
        let mut bad = declaration();
        bad.deployments[0].config.max_concurrent_queries = 0;

        let resp = deploy_application(State(state.clone()), Json(bad)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.controller.list_applications().await.is_empty());
    }

    #[tokio::test]
    async fn status_of_unknown_application_is_not_found() {
        let state = test_state();
        let resp = application_status(State(state), Path("nope".to_string()), HeaderMap::new()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_as_protobuf() {
        let state = test_state();
        state
            .controller
            .deploy_application(declaration(), now_secs())
            .await
            .unwrap();

        let resp =
            application_status(State(state), Path("shop".to_string()), protobuf_headers()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let decoded = wire::StatusOverview::decode(body_bytes(resp).await).unwrap();
        assert_eq!(decoded.name, "shop");
        assert_eq!(decoded.deployment_statuses.len(), 1);
    }

    #[tokio::test]
    async fn replica_event_for_unknown_replica_is_not_found() {
        let state = test_state();
        state
            .controller
            .deploy_application(declaration(), now_secs())
            .await
            .unwrap();

        let event = ReplicaEvent {
            deployment: DeploymentId::new("shop", "ranker"),
            replica_id: "shop/ranker#42".to_string(),
            kind: ReplicaEventKind::Stopped,
        };
        let resp = replica_event(State(state), Json(event)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn negative_load_is_bad_request() {
        let state = test_state();
        state
            .controller
            .deploy_application(declaration(), now_secs())
            .await
            .unwrap();

        let sample = LoadSample {
            deployment: DeploymentId::new("shop", "ranker"),
            replica_id: "shop/ranker#0".to_string(),
            in_flight: -1.0,
            timestamp: None,
        };
        let resp = record_load(State(state), Json(sample)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn redeploy_while_deleting_conflicts() {
        let state = test_state();
        state
            .controller
            .deploy_application(declaration(), now_secs())
            .await
            .unwrap();

        let resp = delete_application(State(state.clone()), Path("shop".to_string())).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = deploy_application(State(state), Json(declaration())).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn healthz_answers_success() {
        let resp = healthz(HeaderMap::new()).await;
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["message"], "success");

        let resp = healthz(protobuf_headers()).await;
        let decoded = wire::HealthzResponse::decode(body_bytes(resp).await).unwrap();
        assert_eq!(decoded.message, "success");
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
        let body = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
        assert!(body.contains("steward_long_poll_waiters 0"));
    }
}
