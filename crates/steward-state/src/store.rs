//! VersionedKeyStore — in-memory blobs with monotonically increasing
//! snapshot ids.
//!
//! Snapshot ids are drawn from one store-wide sequence, so the ids of any
//! single key strictly increase across writes, deletes, and re-creation.
//! All writes are serialized under the store lock; listeners are notified
//! after the lock is released but before `put` returns, so a writer that
//! observed success is ordered before every wake-up caused by its write.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{StateError, StateResult};
use crate::types::{SnapshotId, UpdatedObject};

/// Receives a callback for every successful write.
pub trait ChangeListener: Send + Sync {
    fn notify_changed(&self, key: &str, snapshot_id: SnapshotId);
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, UpdatedObject>,
    next_snapshot_id: SnapshotId,
}

/// Thread-safe versioned key store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct VersionedKeyStore {
    inner: Arc<RwLock<StoreInner>>,
    listeners: Arc<RwLock<Vec<Arc<dyn ChangeListener>>>>,
}

impl VersionedKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener notified on every write.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners
            .write()
            .expect("listeners lock")
            .push(listener);
    }

    /// Store `blob` under `key` and return the new snapshot id.
    ///
    /// Always advances the snapshot id, even if the blob is unchanged.
    pub fn put(&self, key: &str, blob: impl Into<Bytes>) -> StateResult<SnapshotId> {
        let snapshot_id = {
            let mut inner = self.inner.write().expect("key store lock");
            let snapshot_id = allocate_snapshot_id(&mut inner, key)?;
            inner.entries.insert(
                key.to_string(),
                UpdatedObject {
                    object_snapshot: blob.into(),
                    snapshot_id,
                },
            );
            snapshot_id
        };
        trace!(%key, snapshot_id, "key updated");
        self.notify(key, snapshot_id);
        Ok(snapshot_id)
    }

    /// Store `blob` only if it differs from the current value.
    ///
    /// Returns `None` when the write was suppressed.
    pub fn put_if_changed(
        &self,
        key: &str,
        blob: impl Into<Bytes>,
    ) -> StateResult<Option<SnapshotId>> {
        let blob = blob.into();
        let snapshot_id = {
            let mut inner = self.inner.write().expect("key store lock");
            if inner
                .entries
                .get(key)
                .is_some_and(|current| current.object_snapshot == blob)
            {
                return Ok(None);
            }
            let snapshot_id = allocate_snapshot_id(&mut inner, key)?;
            inner.entries.insert(
                key.to_string(),
                UpdatedObject {
                    object_snapshot: blob,
                    snapshot_id,
                },
            );
            snapshot_id
        };
        trace!(%key, snapshot_id, "key updated");
        self.notify(key, snapshot_id);
        Ok(Some(snapshot_id))
    }

    /// Serialize `value` as JSON and store it under `key`.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StateResult<SnapshotId> {
        let blob = serde_json::to_vec(value).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.put(key, blob)
    }

    /// Serialize `value` as JSON and store it only if the encoding changed.
    pub fn put_json_if_changed<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> StateResult<Option<SnapshotId>> {
        let blob = serde_json::to_vec(value).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.put_if_changed(key, blob)
    }

    /// Current value and snapshot id of `key`.
    pub fn get(&self, key: &str) -> Option<UpdatedObject> {
        self.inner
            .read()
            .expect("key store lock")
            .entries
            .get(key)
            .cloned()
    }

    /// Deserialize the JSON value stored under `key`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StateResult<T> {
        let object = self
            .get(key)
            .ok_or_else(|| StateError::NotFound(key.to_string()))?;
        serde_json::from_slice(&object.object_snapshot)
            .map_err(|e| StateError::Deserialize(e.to_string()))
    }

    pub fn snapshot_id(&self, key: &str) -> Option<SnapshotId> {
        self.inner
            .read()
            .expect("key store lock")
            .entries
            .get(key)
            .map(|object| object.snapshot_id)
    }

    /// Every watched key whose current snapshot id is strictly greater than
    /// the caller's, evaluated under a single read lock.
    ///
    /// Keys absent from the store are omitted.
    pub fn changed_since(
        &self,
        watched: &HashMap<String, SnapshotId>,
    ) -> HashMap<String, UpdatedObject> {
        let inner = self.inner.read().expect("key store lock");
        watched
            .iter()
            .filter_map(|(key, last_seen)| {
                inner
                    .entries
                    .get(key)
                    .filter(|object| object.snapshot_id > *last_seen)
                    .map(|object| (key.clone(), object.clone()))
            })
            .collect()
    }

    /// Remove `key`. Returns true if it existed.
    pub fn delete(&self, key: &str) -> bool {
        let existed = self
            .inner
            .write()
            .expect("key store lock")
            .entries
            .remove(key)
            .is_some();
        debug!(%key, existed, "key deleted");
        existed
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .read()
            .expect("key store lock")
            .entries
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("key store lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, key: &str, snapshot_id: SnapshotId) {
        let listeners = self.listeners.read().expect("listeners lock").clone();
        for listener in listeners {
            listener.notify_changed(key, snapshot_id);
        }
    }
}

fn allocate_snapshot_id(inner: &mut StoreInner, key: &str) -> StateResult<SnapshotId> {
    let snapshot_id = inner.next_snapshot_id;
    inner.next_snapshot_id = snapshot_id
        .checked_add(1)
        .ok_or_else(|| StateError::SnapshotExhausted(key.to_string()))?;
    Ok(snapshot_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::types::UNSEEN_SNAPSHOT_ID;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, SnapshotId)>>,
    }

    impl ChangeListener for Recorder {
        fn notify_changed(&self, key: &str, snapshot_id: SnapshotId) {
            self.seen
                .lock()
                .unwrap()
                .push((key.to_string(), snapshot_id));
        }
    }

    #[test]
    fn repeated_puts_strictly_increase() {
        let store = VersionedKeyStore::new();
        let mut last = UNSEEN_SNAPSHOT_ID;
        for i in 0..20 {
            let id = store.put("endpoints", format!("v{i}")).unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn identical_blob_still_advances() {
        let store = VersionedKeyStore::new();
        let first = store.put("k", "same").unwrap();
        let second = store.put("k", "same").unwrap();
        assert!(second > first);
    }

    #[test]
    fn put_if_changed_suppresses_identical_blob() {
        let store = VersionedKeyStore::new();
        let first = store.put_if_changed("k", "a").unwrap();
        assert!(first.is_some());
        assert_eq!(store.put_if_changed("k", "a").unwrap(), None);
        assert_eq!(store.snapshot_id("k"), first);
        assert!(store.put_if_changed("k", "b").unwrap() > first);
    }

    #[test]
    fn get_returns_latest_value() {
        let store = VersionedKeyStore::new();
        assert!(store.get("missing").is_none());

        store.put("k", "one").unwrap();
        let id = store.put("k", "two").unwrap();
        let object = store.get("k").unwrap();
        assert_eq!(object.object_snapshot, Bytes::from("two"));
        assert_eq!(object.snapshot_id, id);
    }

    #[test]
    fn get_json_reports_not_found() {
        let store = VersionedKeyStore::new();
        let err = store.get_json::<Vec<u32>>("nope").unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));

        store.put_json("nums", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(store.get_json::<Vec<u32>>("nums").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn recreated_key_keeps_advancing() {
        let store = VersionedKeyStore::new();
        let before = store.put("k", "a").unwrap();
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        let after = store.put("k", "b").unwrap();
        assert!(after > before);
    }

    #[test]
    fn changed_since_batches_every_advanced_key() {
        let store = VersionedKeyStore::new();
        let a = store.put("a", "1").unwrap();
        let b = store.put("b", "1").unwrap();
        store.put("c", "1").unwrap();

        let watched = HashMap::from([
            ("a".to_string(), a),
            ("b".to_string(), b - 1),
            ("c".to_string(), UNSEEN_SNAPSHOT_ID),
            ("missing".to_string(), UNSEEN_SNAPSHOT_ID),
        ]);
        let changed = store.changed_since(&watched);

        let mut keys: Vec<_> = changed.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn listeners_are_notified_before_put_returns() {
        let store = VersionedKeyStore::new();
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());

        let id = store.put("endpoints", "{}").unwrap();
        assert_eq!(
            recorder.seen.lock().unwrap().as_slice(),
            &[("endpoints".to_string(), id)]
        );

        store.put_if_changed("endpoints", "{}").unwrap();
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn keys_are_sorted() {
        let store = VersionedKeyStore::new();
        store.put("b", "").unwrap();
        store.put("a", "").unwrap();
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.len(), 2);
    }
}
