//! Long-poll source that talks to a remote daemon over HTTP.
//!
//! Each poll is one `POST /api/v1/long_poll` carrying a protobuf
//! `LongPollRequest`. The server answers `200` with a `LongPollResult` or
//! `204` once its timeout elapses.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use prost::Message;
use tracing::debug;

use steward_state::{SnapshotId, wire};

use crate::client::{LongPollError, LongPollSource};
use crate::host::PollOutcome;

pub const LONG_POLL_PATH: &str = "/api/v1/long_poll";

/// Extra time granted to the server beyond the poll timeout before the
/// request is abandoned.
const RESPONSE_GRACE: Duration = Duration::from_secs(5);

/// Polls the daemon listening on `address` (`host:port`).
#[derive(Debug, Clone)]
pub struct HttpSource {
    address: String,
}

impl HttpSource {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn send(
        &self,
        watched: HashMap<String, SnapshotId>,
        timeout: Duration,
    ) -> Result<PollOutcome, LongPollError> {
        let uri = format!(
            "http://{}{LONG_POLL_PATH}?timeout_s={}",
            self.address,
            timeout.as_secs_f64()
        );
        let body = wire::LongPollRequest {
            keys_to_snapshot_ids: watched,
        }
        .encode_to_vec();

        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| LongPollError::Transport(format!("connect {}: {e}", self.address)))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| LongPollError::Transport(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", self.address.as_str())
            .header("content-type", "application/x-protobuf")
            .header("user-agent", "steward-longpoll/0.1")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| LongPollError::Transport(format!("invalid request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| LongPollError::Transport(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == http::StatusCode::NO_CONTENT {
            debug!(%uri, "long poll timed out on the server");
            return Ok(PollOutcome::TimedOut);
        }
        if status != http::StatusCode::OK {
            return Err(LongPollError::Protocol(format!("unexpected status {status}")));
        }

        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| LongPollError::Transport(format!("reading body: {e}")))?
            .to_bytes();
        let result = wire::LongPollResult::decode(bytes)
            .map_err(|e| LongPollError::Protocol(format!("invalid LongPollResult: {e}")))?;
        Ok(PollOutcome::Updated(result.into_updated_objects()))
    }
}

impl LongPollSource for HttpSource {
    async fn poll(
        &self,
        watched: HashMap<String, SnapshotId>,
        timeout: Duration,
    ) -> Result<PollOutcome, LongPollError> {
        match tokio::time::timeout(timeout + RESPONSE_GRACE, self.send(watched, timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LongPollError::Transport(format!(
                "no response from {} within {:?}",
                self.address,
                timeout + RESPONSE_GRACE
            ))),
        }
    }
}
