//! CheckpointStore — redb-backed persistence of application declarations.
//!
//! The controller checkpoints every accepted submission and removes it once
//! the application is fully deleted. On restart the stored declarations are
//! re-submitted. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::APPLICATIONS;
use crate::types::ApplicationDeclaration;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe checkpoint store backed by redb.
#[derive(Clone)]
pub struct CheckpointStore {
    db: Arc<Database>,
}

impl CheckpointStore {
    /// Open (or create) a persistent checkpoint store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "checkpoint store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory checkpoint store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory checkpoint store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace an application declaration.
    pub fn put_application(&self, declaration: &ApplicationDeclaration) -> StateResult<()> {
        let value = serde_json::to_vec(declaration).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            table
                .insert(declaration.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app = %declaration.name, "application checkpointed");
        Ok(())
    }

    pub fn get_application(&self, name: &str) -> StateResult<Option<ApplicationDeclaration>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let declaration: ApplicationDeclaration =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(declaration))
            }
            None => Ok(None),
        }
    }

    /// All checkpointed declarations, ordered by application name.
    pub fn list_applications(&self) -> StateResult<Vec<ApplicationDeclaration>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let declaration: ApplicationDeclaration =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(declaration);
        }
        Ok(results)
    }

    /// Remove a declaration. Returns true if it existed.
    pub fn delete_application(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app = %name, existed, "application checkpoint deleted");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeploymentConfig, DeploymentDeclaration, ReplicaConfig};

    fn declaration(name: &str) -> ApplicationDeclaration {
        ApplicationDeclaration {
            name: name.to_string(),
            route_prefix: Some(format!("/{name}")),
            ingress: None,
            deployments: vec![DeploymentDeclaration {
                name: "front".to_string(),
                config: DeploymentConfig::default(),
                replica_config: ReplicaConfig::new("app.front:Front"),
            }],
        }
    }

    #[test]
    fn application_put_and_get() {
        let store = CheckpointStore::open_in_memory().unwrap();
        let decl = declaration("shop");

        store.put_application(&decl).unwrap();
        assert_eq!(store.get_application("shop").unwrap(), Some(decl));
        assert!(store.get_application("other").unwrap().is_none());
    }

    #[test]
    fn application_list_is_ordered() {
        let store = CheckpointStore::open_in_memory().unwrap();
        store.put_application(&declaration("zoo")).unwrap();
        store.put_application(&declaration("admin")).unwrap();

        let names: Vec<String> = store
            .list_applications()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["admin".to_string(), "zoo".to_string()]);
    }

    #[test]
    fn application_delete() {
        let store = CheckpointStore::open_in_memory().unwrap();
        store.put_application(&declaration("shop")).unwrap();

        assert!(store.delete_application("shop").unwrap());
        assert!(!store.delete_application("shop").unwrap());
        assert!(store.list_applications().unwrap().is_empty());
    }

    #[test]
    fn checkpoint_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.redb");
        {
            let store = CheckpointStore::open(&path).unwrap();
            store.put_application(&declaration("shop")).unwrap();
        }
        let reopened = CheckpointStore::open(&path).unwrap();
        assert_eq!(reopened.list_applications().unwrap().len(), 1);
    }
}
