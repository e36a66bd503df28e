//! StateStore — redb-backed persistence for app and version rows.
//!
//! Values are JSON-serialized into `&[u8]` columns. Both an on-disk and an
//! in-memory backend are supported; the latter is used by tests and by the
//! daemon's development mode.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use appgrid_core::{AppKey, VersionKey};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::{APPS, VERSIONS};
use crate::types::*;

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(APPS).map_err(map_err!(Table))?;
        txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic row access ─────────────────────────────────────────

    fn put_row<T: Serialize>(&self, table: Table, key: &str, row: &T) -> StateResult<()> {
        let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let row = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// All rows whose key starts with `prefix` (empty prefix = all rows).
    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut rows = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                rows.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        }
        Ok(rows)
    }

    // ── Apps ───────────────────────────────────────────────────────

    pub fn put_app(&self, record: &AppRecord) -> StateResult<()> {
        let key = record.table_key();
        self.put_row(APPS, &key, record)?;
        debug!(%key, status = ?record.status, "app row stored");
        Ok(())
    }

    pub fn get_app(&self, key: &AppKey) -> StateResult<Option<AppRecord>> {
        self.get_row(APPS, &app_table_key(key))
    }

    pub fn list_apps(&self) -> StateResult<Vec<AppRecord>> {
        self.scan(APPS, "")
    }

    /// Number of app rows.
    pub fn count_apps(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(APPS).map_err(map_err!(Table))?;
        let mut count = 0;
        for entry in t.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of distinct users owning at least one app.
    pub fn count_users(&self) -> StateResult<u64> {
        let users: BTreeSet<String> = self.list_apps()?.into_iter().map(|a| a.user).collect();
        Ok(users.len() as u64)
    }

    // ── Versions ───────────────────────────────────────────────────

    pub fn put_version(&self, record: &AppVersionRecord) -> StateResult<()> {
        let key = record.table_key();
        self.put_row(VERSIONS, &key, record)?;
        debug!(%key, stopped = record.is_stopped(), "version row stored");
        Ok(())
    }

    pub fn get_version(&self, key: &VersionKey) -> StateResult<Option<AppVersionRecord>> {
        self.get_row(VERSIONS, &version_table_key(key))
    }

    /// Version rows of one app, oldest version first.
    pub fn list_versions(&self, key: &AppKey) -> StateResult<Vec<AppVersionRecord>> {
        let mut rows: Vec<AppVersionRecord> = self.scan(VERSIONS, &version_prefix(key))?;
        rows.sort_by_key(|r| r.version);
        Ok(rows)
    }

    // ── Deletion ───────────────────────────────────────────────────

    /// Remove an app row and all of its version rows in one transaction.
    ///
    /// Returns `(app_existed, versions_removed)`. Deleting a missing app
    /// is not an error.
    pub fn delete_app(&self, key: &AppKey) -> StateResult<(bool, u32)> {
        let prefix = version_prefix(key);
        let version_keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let t = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in t.iter().map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                if k.value().starts_with(&prefix) {
                    keys.push(k.value().to_string());
                }
            }
            keys
        };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut apps = txn.open_table(APPS).map_err(map_err!(Table))?;
            existed = apps
                .remove(app_table_key(key).as_str())
                .map_err(map_err!(Write))?
                .is_some();
            let mut versions = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            for k in &version_keys {
                versions.remove(k.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        let removed = version_keys.len() as u32;
        debug!(app = %key, existed, versions = removed, "app rows deleted");
        Ok((existed, removed))
    }
}
