//! Long-poll endpoints.
//!
//! Both variants hold the request open until a watched key moves past the
//! caller's snapshot id or the timeout elapses. A timeout is answered with
//! `204 No Content`; the client simply polls again with the same ids.

use std::collections::{BTreeMap, HashMap};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use prost::Message;
use serde::{Deserialize, Serialize};
use tracing::debug;

use steward_longpoll::PollOutcome;
use steward_state::{SnapshotId, UpdatedObject, wire};

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response, protobuf_response};

/// Query parameters shared by both long-poll variants.
#[derive(Debug, Default, Deserialize)]
pub struct PollParams {
    /// Requested timeout, bounded by `long_poll.max_timeout_s`.
    pub timeout_s: Option<f64>,
}

/// JSON request body.
#[derive(Debug, Deserialize)]
pub struct JsonPollRequest {
    pub keys_to_snapshot_ids: HashMap<String, SnapshotId>,
}

#[derive(Debug, Serialize)]
pub struct JsonUpdatedObject {
    pub snapshot_id: SnapshotId,
    /// The stored JSON document, or a string if the blob is not JSON.
    pub object_snapshot: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JsonPollResult {
    pub updated_objects: BTreeMap<String, JsonUpdatedObject>,
}

impl From<HashMap<String, UpdatedObject>> for JsonPollResult {
    fn from(updated: HashMap<String, UpdatedObject>) -> Self {
        let updated_objects = updated
            .into_iter()
            .map(|(key, object)| {
                let snapshot = serde_json::from_slice(&object.object_snapshot).unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&object.object_snapshot).into_owned())
                });
                (
                    key,
                    JsonUpdatedObject {
                        snapshot_id: object.snapshot_id,
                        object_snapshot: snapshot,
                    },
                )
            })
            .collect();
        Self { updated_objects }
    }
}

/// POST /api/v1/long_poll
pub async fn long_poll_protobuf(
    State(state): State<ApiState>,
    Query(params): Query<PollParams>,
    body: Bytes,
) -> Response {
    let request = match wire::LongPollRequest::decode(body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(&format!("invalid LongPollRequest: {e}"), StatusCode::BAD_REQUEST)
                .into_response();
        }
    };

    let timeout = state.long_poll_config.resolve_timeout(params.timeout_s);
    debug!(keys = request.keys_to_snapshot_ids.len(), timeout_secs = timeout.as_secs_f64(), "long poll");
    match state.long_poll.poll(request.keys_to_snapshot_ids, timeout).await {
        PollOutcome::Updated(updated) => protobuf_response(&wire::LongPollResult::from(updated)),
        PollOutcome::TimedOut => StatusCode::NO_CONTENT.into_response(),
    }
}

/// POST /api/v1/long_poll/json
pub async fn long_poll_json(
    State(state): State<ApiState>,
    Query(params): Query<PollParams>,
    Json(request): Json<JsonPollRequest>,
) -> Response {
    let timeout = state.long_poll_config.resolve_timeout(params.timeout_s);
    match state.long_poll.poll(request.keys_to_snapshot_ids, timeout).await {
        PollOutcome::Updated(updated) => ApiResponse::ok(JsonPollResult::from(updated)).into_response(),
        PollOutcome::TimedOut => StatusCode::NO_CONTENT.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    use steward_controller::Controller;
    use steward_core::LongPollConfig;
    use steward_longpoll::LongPollHost;
    use steward_metrics::MetricsAggregator;
    use steward_state::{UNSEEN_SNAPSHOT_ID, VersionedKeyStore};

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

    fn request(keys: &[(&str, SnapshotId)]) -> Bytes {
        wire::LongPollRequest {
            keys_to_snapshot_ids: keys.iter().map(|(k, id)| (k.to_string(), *id)).collect(),
        }
        .encode_to_vec()
        .into()
    }

    fn params(timeout_s: f64) -> Query<PollParams> {
        Query(PollParams {
            timeout_s: Some(timeout_s),
        })
    }

    async fn body_bytes(resp: Response) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn unseen_key_returns_current_value() {
        let state = test_state();
        let id = state.long_poll.store().put("routes", "v1").unwrap();

        let resp = long_poll_protobuf(
            State(state),
            params(1.0),
            request(&[("routes", UNSEEN_SNAPSHOT_ID)]),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let result = wire::LongPollResult::decode(body_bytes(resp).await).unwrap();
        let object = &result.updated_objects["routes"];
        assert_eq!(object.snapshot_id, id);
        assert_eq!(&object.object_snapshot[..], b"v1");
    }

    #[tokio::test(start_paused = true)]
    async fn up_to_date_poll_times_out_with_no_content() {
        let state = test_state();
        let id = state.long_poll.store().put("routes", "v1").unwrap();

        let resp = long_poll_protobuf(State(state), params(5.0), request(&[("routes", id)])).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test(start_paused = true)]
    async fn write_during_poll_wakes_it() {
        let state = test_state();
        let store = state.long_poll.store().clone();
        let id = store.put("routes", "v1").unwrap();

        let poll = tokio::spawn(long_poll_protobuf(State(state), params(30.0), request(&[("routes", id)])));
        tokio::task::yield_now().await;
        let newer = store.put("routes", "v2").unwrap();

        let resp = poll.await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let result = wire::LongPollResult::decode(body_bytes(resp).await).unwrap();
        assert_eq!(result.updated_objects["routes"].snapshot_id, newer);
    }

    #[tokio::test]
    async fn garbage_body_is_bad_request() {
        let state = test_state();
        let resp = long_poll_protobuf(
            State(state),
            Query(PollParams::default()),
            Bytes::from_static(&[0xff, 0xff, 0xff]),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn json_poll_renders_documents() {
        let state = test_state();
        state
            .long_poll
            .store()
            .put_json("endpoints", &serde_json::json!({"shop/ranker": {"route": "/shop"}}))
            .unwrap();
        state.long_poll.store().put("raw", "not json").unwrap();

        let body = JsonPollRequest {
            keys_to_snapshot_ids: HashMap::from([
                ("endpoints".to_string(), UNSEEN_SNAPSHOT_ID),
                ("raw".to_string(), UNSEEN_SNAPSHOT_ID),
            ]),
        };
        let resp = long_poll_json(State(state), params(1.0), Json(body)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        let objects = &body["data"]["updated_objects"];
        assert_eq!(objects["endpoints"]["object_snapshot"]["shop/ranker"]["route"], "/shop");
        assert_eq!(objects["raw"]["object_snapshot"], "not json");
    }
}
