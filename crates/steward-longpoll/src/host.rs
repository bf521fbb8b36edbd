//! LongPollHost — blocks poll requests until a watched key advances.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use steward_state::{ChangeListener, SnapshotId, UpdatedObject, VersionedKeyStore};

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Every watched key whose snapshot id advanced past the caller's.
    Updated(HashMap<String, UpdatedObject>),
    /// Nothing changed before the deadline.
    TimedOut,
}

struct Waiter {
    keys: Vec<String>,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    waiters: HashMap<u64, Waiter>,
    by_key: HashMap<String, HashSet<u64>>,
}

impl RegistryInner {
    fn unlink(&mut self, id: u64) -> Option<Waiter> {
        let waiter = self.waiters.remove(&id)?;
        for key in &waiter.keys {
            if let Some(ids) = self.by_key.get_mut(key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        Some(waiter)
    }
}

/// Pending polls, indexed by the keys they watch.
#[derive(Default)]
struct WaiterRegistry {
    inner: Mutex<RegistryInner>,
}

impl WaiterRegistry {
    fn register(self: &Arc<Self>, keys: Vec<String>) -> (WaiterGuard, oneshot::Receiver<()>) {
        let (wake, rx) = oneshot::channel();
        let mut inner = self.inner.lock().expect("waiter registry lock");
        let id = inner.next_id;
        inner.next_id += 1;
        for key in &keys {
            inner.by_key.entry(key.clone()).or_default().insert(id);
        }
        inner.waiters.insert(id, Waiter { keys, wake });
        let guard = WaiterGuard {
            registry: Arc::clone(self),
            id,
        };
        (guard, rx)
    }

    fn remove(&self, id: u64) {
        self.inner
            .lock()
            .expect("waiter registry lock")
            .unlink(id);
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("waiter registry lock").waiters.len()
    }
}

impl ChangeListener for WaiterRegistry {
    fn notify_changed(&self, key: &str, snapshot_id: SnapshotId) {
        let woken: Vec<Waiter> = {
            let mut inner = self.inner.lock().expect("waiter registry lock");
            let Some(ids) = inner.by_key.get(key).cloned() else {
                return;
            };
            ids.into_iter().filter_map(|id| inner.unlink(id)).collect()
        };
        trace!(%key, snapshot_id, waiters = woken.len(), "waking long-poll waiters");
        for waiter in woken {
            // The receiver is gone if the poll was dropped concurrently.
            let _ = waiter.wake.send(());
        }
    }
}

/// Deregisters a waiter when the owning poll finishes or is dropped.
struct WaiterGuard {
    registry: Arc<WaiterRegistry>,
    id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Serves long-poll requests against a [`VersionedKeyStore`]. Cheap to
/// clone; clones share the waiter set.
#[derive(Clone)]
pub struct LongPollHost {
    store: VersionedKeyStore,
    waiters: Arc<WaiterRegistry>,
}

impl LongPollHost {
    /// Create a host and subscribe it to writes on `store`.
    pub fn new(store: VersionedKeyStore) -> Self {
        let waiters = Arc::new(WaiterRegistry::default());
        store.subscribe(waiters.clone());
        Self { store, waiters }
    }

    pub fn store(&self) -> &VersionedKeyStore {
        &self.store
    }

    /// Wait until at least one key in `watched` has a snapshot id greater
    /// than the caller's, or `timeout` elapses.
    ///
    /// Keys missing from the store are never returned; a poll watching only
    /// missing keys waits for one of them to be created.
    pub async fn poll(
        &self,
        watched: HashMap<String, SnapshotId>,
        timeout: Duration,
    ) -> PollOutcome {
        let deadline = Instant::now() + timeout;
        let keys: Vec<String> = watched.keys().cloned().collect();

        loop {
            // Register before evaluating so a write landing in between still
            // resolves this waiter.
            let (_guard, woken) = self.waiters.register(keys.clone());

            let updated = self.store.changed_since(&watched);
            if !updated.is_empty() {
                debug!(keys = updated.len(), "long poll returning updates");
                return PollOutcome::Updated(updated);
            }

            if tokio::time::timeout_at(deadline, woken).await.is_err() {
                trace!(keys = keys.len(), "long poll timed out");
                return PollOutcome::TimedOut;
            }
        }
    }

    /// Number of polls currently suspended.
    pub fn num_waiters(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_state::UNSEEN_SNAPSHOT_ID;

    fn watch(entries: &[(&str, SnapshotId)]) -> HashMap<String, SnapshotId> {
        entries
            .iter()
            .map(|(key, id)| (key.to_string(), *id))
            .collect()
    }

    async fn wait_for_waiters(host: &LongPollHost, count: usize) {
        while host.num_waiters() != count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unseen_key_returns_immediately() {
        let host = LongPollHost::new(VersionedKeyStore::new());
        let id = host.store().put("endpoints", "{}").unwrap();

        let outcome = host
            .poll(watch(&[("endpoints", UNSEEN_SNAPSHOT_ID)]), Duration::from_secs(30))
            .await;

        let PollOutcome::Updated(updated) = outcome else {
            panic!("expected updates");
        };
        assert_eq!(updated["endpoints"].snapshot_id, id);
        assert_eq!(host.num_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_advanced_keys_are_returned() {
        let host = LongPollHost::new(VersionedKeyStore::new());
        let a = host.store().put("a", "1").unwrap();
        host.store().put("b", "1").unwrap();

        let outcome = host
            .poll(
                watch(&[("a", a), ("b", UNSEEN_SNAPSHOT_ID)]),
                Duration::from_secs(30),
            )
            .await;

        let PollOutcome::Updated(updated) = outcome else {
            panic!("expected updates");
        };
        assert_eq!(updated.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn up_to_date_poll_blocks_until_write() {
        let host = LongPollHost::new(VersionedKeyStore::new());
        let id = host.store().put("endpoints", "v1").unwrap();

        let poller = {
            let host = host.clone();
            tokio::spawn(async move {
                host.poll(watch(&[("endpoints", id)]), Duration::from_secs(30))
                    .await
            })
        };
        wait_for_waiters(&host, 1).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!poller.is_finished());

        let next = host.store().put("endpoints", "v2").unwrap();
        let PollOutcome::Updated(updated) = poller.await.unwrap() else {
            panic!("expected updates");
        };
        assert_eq!(updated["endpoints"].snapshot_id, next);
        assert_eq!(host.num_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn up_to_date_poll_times_out() {
        let host = LongPollHost::new(VersionedKeyStore::new());
        let id = host.store().put("endpoints", "v1").unwrap();

        let outcome = host
            .poll(watch(&[("endpoints", id)]), Duration::from_secs(2))
            .await;

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(host.num_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_before_resumption_are_batched() {
        let host = LongPollHost::new(VersionedKeyStore::new());
        let a = host.store().put("a", "1").unwrap();
        let b = host.store().put("b", "1").unwrap();

        let poller = {
            let host = host.clone();
            tokio::spawn(async move {
                host.poll(watch(&[("a", a), ("b", b)]), Duration::from_secs(30))
                    .await
            })
        };
        wait_for_waiters(&host, 1).await;

        // Both writes land before the poller gets to run again.
        host.store().put("a", "2").unwrap();
        host.store().put("b", "2").unwrap();

        let PollOutcome::Updated(updated) = poller.await.unwrap() else {
            panic!("expected updates");
        };
        assert_eq!(updated.len(), 2);
        assert!(updated["a"].snapshot_id > a);
        assert!(updated["b"].snapshot_id > b);
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_writes_do_not_wake() {
        let host = LongPollHost::new(VersionedKeyStore::new());
        let a = host.store().put("a", "1").unwrap();

        let poller = {
            let host = host.clone();
            tokio::spawn(async move {
                host.poll(watch(&[("a", a)]), Duration::from_secs(30)).await
            })
        };
        wait_for_waiters(&host, 1).await;

        host.store().put("b", "1").unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!poller.is_finished());
        assert_eq!(host.num_waiters(), 1);

        host.store().put("a", "2").unwrap();
        assert!(matches!(poller.await.unwrap(), PollOutcome::Updated(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_waits_for_creation() {
        let host = LongPollHost::new(VersionedKeyStore::new());

        let poller = {
            let host = host.clone();
            tokio::spawn(async move {
                host.poll(
                    watch(&[("replicas:shop/ranker", UNSEEN_SNAPSHOT_ID)]),
                    Duration::from_secs(30),
                )
                .await
            })
        };
        wait_for_waiters(&host, 1).await;
        assert!(!poller.is_finished());

        host.store().put("replicas:shop/ranker", "[]").unwrap();
        let PollOutcome::Updated(updated) = poller.await.unwrap() else {
            panic!("expected updates");
        };
        assert!(updated.contains_key("replicas:shop/ranker"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_poll_releases_waiter() {
        let host = LongPollHost::new(VersionedKeyStore::new());
        let id = host.store().put("endpoints", "v1").unwrap();

        let poller = {
            let host = host.clone();
            tokio::spawn(async move {
                host.poll(watch(&[("endpoints", id)]), Duration::from_secs(30))
                    .await
            })
        };
        wait_for_waiters(&host, 1).await;

        poller.abort();
        assert!(poller.await.unwrap_err().is_cancelled());
        assert_eq!(host.num_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_polls_are_independent() {
        let host = LongPollHost::new(VersionedKeyStore::new());
        let a = host.store().put("a", "1").unwrap();
        let b = host.store().put("b", "1").unwrap();

        let spawn_poll = |watched: HashMap<String, SnapshotId>| {
            let host = host.clone();
            tokio::spawn(async move { host.poll(watched, Duration::from_secs(30)).await })
        };
        let first = spawn_poll(watch(&[("a", a), ("b", b)]));
        let second = spawn_poll(watch(&[("b", b)]));
        wait_for_waiters(&host, 2).await;

        host.store().put("a", "2").unwrap();
        assert!(matches!(first.await.unwrap(), PollOutcome::Updated(_)));
        assert_eq!(host.num_waiters(), 1);
        assert!(!second.is_finished());

        second.abort();
        let _ = second.await;
        assert_eq!(host.num_waiters(), 0);
    }
}
