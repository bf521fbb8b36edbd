//! LongPollClient — subscriber loop dispatching per-key callbacks.
//!
//! The client remembers the last snapshot id it delivered for every key
//! and sends those ids on each poll, so a callback fires once per observed
//! change. Updates older than what was already delivered are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use steward_state::{SnapshotId, UNSEEN_SNAPSHOT_ID, UpdatedObject};

use crate::host::{LongPollHost, PollOutcome};

/// Delay before retrying after a failed poll.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum LongPollError {
    #[error("long poll transport error: {0}")]
    Transport(String),
    #[error("malformed long poll response: {0}")]
    Protocol(String),
}

/// Anything that can answer a long-poll request.
pub trait LongPollSource: Send + Sync {
    fn poll(
        &self,
        watched: HashMap<String, SnapshotId>,
        timeout: Duration,
    ) -> impl Future<Output = Result<PollOutcome, LongPollError>> + Send;
}

impl LongPollSource for LongPollHost {
    async fn poll(
        &self,
        watched: HashMap<String, SnapshotId>,
        timeout: Duration,
    ) -> Result<PollOutcome, LongPollError> {
        Ok(LongPollHost::poll(self, watched, timeout).await)
    }
}

/// Invoked with the new value of a subscribed key.
pub type UpdateCallback = Box<dyn Fn(&UpdatedObject) + Send + Sync>;

pub struct LongPollClient<S> {
    source: S,
    poll_timeout: Duration,
    callbacks: HashMap<String, UpdateCallback>,
    snapshot_ids: HashMap<String, SnapshotId>,
}

impl<S: LongPollSource> LongPollClient<S> {
    pub fn new(source: S, poll_timeout: Duration) -> Self {
        Self {
            source,
            poll_timeout,
            callbacks: HashMap::new(),
            snapshot_ids: HashMap::new(),
        }
    }

    /// Subscribe to `key`, replacing any previous callback for it.
    pub fn on_update(mut self, key: impl Into<String>, callback: UpdateCallback) -> Self {
        let key = key.into();
        self.snapshot_ids.insert(key.clone(), UNSEEN_SNAPSHOT_ID);
        self.callbacks.insert(key, callback);
        self
    }

    /// Last snapshot id delivered for `key`.
    pub fn snapshot_id(&self, key: &str) -> SnapshotId {
        self.snapshot_ids
            .get(key)
            .copied()
            .unwrap_or(UNSEEN_SNAPSHOT_ID)
    }

    /// Issue one poll and dispatch its updates. Returns the number of
    /// callbacks invoked; zero on timeout.
    pub async fn poll_once(&mut self) -> Result<usize, LongPollError> {
        let outcome = self
            .source
            .poll(self.snapshot_ids.clone(), self.poll_timeout)
            .await?;

        let PollOutcome::Updated(updated) = outcome else {
            return Ok(0);
        };

        let mut delivered = 0;
        for (key, object) in updated {
            let Some(callback) = self.callbacks.get(&key) else {
                debug!(%key, "ignoring update for unsubscribed key");
                continue;
            };
            let last = self.snapshot_id(&key);
            if object.snapshot_id <= last {
                debug!(%key, snapshot_id = object.snapshot_id, last, "ignoring stale update");
                continue;
            }
            callback(&object);
            self.snapshot_ids.insert(key, object.snapshot_id);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Poll until `shutdown` flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(keys = self.callbacks.len(), "long poll client started");

        loop {
            tokio::select! {
                result = self.poll_once() => {
                    if let Err(e) = result {
                        warn!(error = %e, "long poll failed; retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("long poll client shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use steward_state::VersionedKeyStore;

    fn recorder() -> (Arc<Mutex<Vec<Bytes>>>, UpdateCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: UpdateCallback = Box::new(move |object: &UpdatedObject| {
            sink.lock().unwrap().push(object.object_snapshot.clone());
        });
        (seen, callback)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_initial_value_then_changes() {
        let store = VersionedKeyStore::new();
        let host = LongPollHost::new(store.clone());
        store.put("endpoints", "v1").unwrap();

        let (seen, callback) = recorder();
        let mut client = LongPollClient::new(host, Duration::from_secs(5))
            .on_update("endpoints", callback);

        assert_eq!(client.poll_once().await.unwrap(), 1);
        assert_eq!(client.snapshot_id("endpoints"), store.snapshot_id("endpoints").unwrap());

        // Nothing new: the poll times out without invoking callbacks.
        assert_eq!(client.poll_once().await.unwrap(), 0);

        store.put("endpoints", "v2").unwrap();
        assert_eq!(client.poll_once().await.unwrap(), 1);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Bytes::from("v1"), Bytes::from("v2")]
        );
    }

    struct FailingSource {
        calls: Arc<AtomicUsize>,
    }

    impl LongPollSource for FailingSource {
        async fn poll(
            &self,
            _watched: HashMap<String, SnapshotId>,
            _timeout: Duration,
        ) -> Result<PollOutcome, LongPollError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LongPollError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_and_stops_on_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_, callback) = recorder();
        let client = LongPollClient::new(
            FailingSource {
                calls: calls.clone(),
            },
            Duration::from_secs(5),
        )
        .on_update("endpoints", callback);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(shutdown_rx));

        tokio::time::sleep(RETRY_BACKOFF * 3 + Duration::from_millis(500)).await;
        assert!(calls.load(Ordering::SeqCst) >= 3);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_dispatches_from_host() {
        let store = VersionedKeyStore::new();
        let host = LongPollHost::new(store.clone());

        let (seen, callback) = recorder();
        let client = LongPollClient::new(host.clone(), Duration::from_secs(30))
            .on_update("replicas:shop/ranker", callback);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(shutdown_rx));

        while host.num_waiters() == 0 {
            tokio::task::yield_now().await;
        }
        store.put("replicas:shop/ranker", "[]").unwrap();
        while seen.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(host.num_waiters(), 0);
    }
}
