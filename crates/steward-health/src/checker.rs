//! Health check probe logic.
//!
//! Performs HTTP health checks against replica endpoints and tracks how
//! long a replica has been failing. A replica is unhealthy once its probes
//! have failed continuously for at least the deployment's
//! `health_check_timeout_s`; a single success recovers it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use steward_state::Timestamp;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_success(self) -> bool {
        self == ProbeResult::Healthy
    }
}

/// Health of a single replica as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Tracks the failure streak of a single replica.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    status: ReplicaHealth,
    consecutive_failures: u32,
    /// Time of the first failure of the current streak.
    failing_since: Option<Timestamp>,
    /// How long a streak must last before the replica is unhealthy.
    timeout_s: f64,
}

impl HealthTracker {
    pub fn new(timeout_s: f64) -> Self {
        Self {
            status: ReplicaHealth::Unknown,
            consecutive_failures: 0,
            failing_since: None,
            timeout_s,
        }
    }

    /// Record a probe result observed at `now` and return the new health.
    pub fn record(&mut self, result: ProbeResult, now: Timestamp) -> ReplicaHealth {
        if result.is_success() {
            if self.status == ReplicaHealth::Unhealthy {
                debug!(failures = self.consecutive_failures, "replica recovered to healthy");
            }
            self.consecutive_failures = 0;
            self.failing_since = None;
            self.status = ReplicaHealth::Healthy;
            return self.status;
        }

        self.consecutive_failures += 1;
        let since = *self.failing_since.get_or_insert(now);
        if now - since >= self.timeout_s && self.status != ReplicaHealth::Unhealthy {
            warn!(
                failures = self.consecutive_failures,
                failing_for_s = now - since,
                timeout_s = self.timeout_s,
                "replica marked unhealthy"
            );
            self.status = ReplicaHealth::Unhealthy;
        }
        self.status
    }

    pub fn status(&self) -> ReplicaHealth {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failing_since(&self) -> Option<Timestamp> {
        self.failing_since
    }

    /// Whether this replica needs replacement (unhealthy).
    pub fn needs_replacement(&self) -> bool {
        self.status == ReplicaHealth::Unhealthy
    }
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>>;

/// Something that can check a replica's health.
pub trait HealthProbe: Send + Sync {
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> ProbeFuture<'a>;
}

/// Probes `GET http://{address}{path}`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    path: String,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl HealthProbe for HttpProbe {
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(http_probe(address, &self.path, timeout))
    }
}

/// Perform an HTTP health probe against an endpoint.
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
/// or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "steward-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                if resp.status().is_success() {
                    ProbeResult::Healthy
                } else {
                    debug!(status = %resp.status(), %uri, "health probe non-2xx");
                    ProbeResult::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_starts_unknown() {
        let tracker = HealthTracker::new(30.0);
        assert_eq!(tracker.status(), ReplicaHealth::Unknown);
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn tracker_becomes_healthy_on_first_success() {
        let mut tracker = HealthTracker::new(30.0);
        assert_eq!(tracker.record(ProbeResult::Healthy, 0.0), ReplicaHealth::Healthy);
    }

    #[test]
    fn short_failure_streak_stays_healthy() {
        let mut tracker = HealthTracker::new(30.0);
        tracker.record(ProbeResult::Healthy, 0.0);

        tracker.record(ProbeResult::Unhealthy, 10.0);
        tracker.record(ProbeResult::Failed, 20.0);
        tracker.record(ProbeResult::Unhealthy, 39.0);
        assert_eq!(tracker.status(), ReplicaHealth::Healthy);
        assert_eq!(tracker.consecutive_failures(), 3);
        assert_eq!(tracker.failing_since(), Some(10.0));
    }

    #[test]
    fn sustained_failures_mark_unhealthy() {
        let mut tracker = HealthTracker::new(30.0);
        tracker.record(ProbeResult::Healthy, 0.0);

        tracker.record(ProbeResult::Unhealthy, 10.0);
        tracker.record(ProbeResult::Unhealthy, 20.0);
        tracker.record(ProbeResult::Unhealthy, 30.0);
        let status = tracker.record(ProbeResult::Failed, 40.0);
        assert_eq!(status, ReplicaHealth::Unhealthy);
        assert!(tracker.needs_replacement());
    }

    #[test]
    fn success_resets_the_streak() {
        let mut tracker = HealthTracker::new(30.0);
        tracker.record(ProbeResult::Unhealthy, 0.0);
        tracker.record(ProbeResult::Unhealthy, 20.0);
        tracker.record(ProbeResult::Healthy, 25.0);
        tracker.record(ProbeResult::Unhealthy, 40.0);

        // The streak restarted at t=40.
        assert_eq!(tracker.record(ProbeResult::Unhealthy, 60.0), ReplicaHealth::Healthy);
        assert_eq!(tracker.record(ProbeResult::Unhealthy, 70.0), ReplicaHealth::Unhealthy);
    }

    #[test]
    fn tracker_recovers_on_success() {
        let mut tracker = HealthTracker::new(0.0);
        tracker.record(ProbeResult::Failed, 0.0);
        assert_eq!(tracker.status(), ReplicaHealth::Unhealthy);

        assert_eq!(tracker.record(ProbeResult::Healthy, 1.0), ReplicaHealth::Healthy);
        assert!(!tracker.needs_replacement());
    }

    #[tokio::test]
    async fn http_probe_to_closed_port_returns_failed() {
        let result = http_probe("127.0.0.1:1", "/-/healthz", Duration::from_millis(100)).await;
        assert_eq!(result, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn http_probe_reports_status_codes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            for status in ["200 OK", "503 Service Unavailable"] {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\n\r\n");
                socket.write_all(response.as_bytes()).await.unwrap();
            }
        });

        let probe = HttpProbe::new("/-/healthz");
        assert_eq!(
            probe.probe(&address, Duration::from_secs(5)).await,
            ProbeResult::Healthy
        );
        assert_eq!(
            probe.probe(&address, Duration::from_secs(5)).await,
            ProbeResult::Unhealthy
        );
    }
}
