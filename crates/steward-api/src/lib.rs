//! steward-api — HTTP surface of the Steward control plane.
//!
//! Long-poll subscription over protobuf or JSON, application management,
//! replica lifecycle and load reports, liveness, and Prometheus
//! exposition.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/long_poll` | Protobuf long poll (200 with updates, 204 on timeout) |
//! | POST | `/api/v1/long_poll/json` | JSON long poll |
//! | GET | `/api/v1/applications` | List application names |
//! | POST | `/api/v1/applications` | Submit an application |
//! | DELETE | `/api/v1/applications/{name}` | Delete an application |
//! | GET | `/api/v1/applications/{name}/status` | Application status overview |
//! | POST | `/api/v1/replicas/events` | Replica lifecycle report |
//! | POST | `/api/v1/metrics` | Replica load sample |
//! | GET | `/-/healthz` | Liveness |
//! | GET | `/metrics` | Prometheus exposition |
//!
//! Handlers answering with a wire message return protobuf when the
//! request's `Accept` header asks for `application/x-protobuf`, and the
//! JSON envelope otherwise.

pub mod handlers;
pub mod long_poll;

use axum::Router;
use axum::routing::{delete, get, post};

use steward_controller::Controller;
use steward_core::LongPollConfig;
use steward_longpoll::LongPollHost;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Controller,
    pub long_poll: LongPollHost,
    pub long_poll_config: LongPollConfig,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/long_poll", post(long_poll::long_poll_protobuf))
        .route("/long_poll/json", post(long_poll::long_poll_json))
        .route(
            "/applications",
            get(handlers::list_applications).post(handlers::deploy_application),
        )
        .route("/applications/{name}", delete(handlers::delete_application))
        .route("/applications/{name}/status", get(handlers::application_status))
        .route("/replicas/events", post(handlers::replica_event))
        .route("/metrics", post(handlers::record_load))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/-/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
