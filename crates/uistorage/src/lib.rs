//! uistorage: pluggable persisted state for unbound (server-owned)
//! variables.
//!
//! Bound variables are never persisted here — the backend that owns them
//! is already their source of truth (spec invariant 4). This crate only
//! write-through-caches variables created with `properties.unbound =
//! "true"`, and its only contract is durability-before-flush: a
//! `create`/`update`/`destroy` on an unbound variable must be committed
//! here before the emitting `update` is handed to the outgoing batcher.
//!
//! Backends mirror the teacher's storage split: `memory` (a `HashMap`
//! behind a mutex, no durability at all — the default for tests and
//! ephemeral sessions) and `sqlite` (`rusqlite`, WAL + `foreign_keys=ON`,
//! schema applied via `execute_batch`, same shape as
//! `services/receiver/src/db.rs`). An optional `postgres` feature adds an
//! async `sqlx::PgPool` backend for multi-process deployments.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;

use uiproto::{Properties, VarId};

#[cfg(feature = "postgres")]
pub mod postgres;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

pub type SessionId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredVariable {
    pub session_id: SessionId,
    pub var_id: VarId,
    pub parent_id: Option<VarId>,
    pub value: Value,
    pub properties: Properties,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serializing properties: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A synchronous write-through store for unbound variables.
///
/// Synchronous because both built-in backends (`rusqlite`, in-memory
/// `HashMap`) are themselves synchronous; the one async backend
/// (`postgres`, behind its feature) is exposed as a separate trait rather
/// than forcing every caller through `spawn_blocking` for the common
/// case, matching the teacher's choice to keep `receiver::db` fully sync
/// and only `server::db` (already fully async around `sqlx`) async.
pub trait Store: Send + Sync {
    fn put(&self, var: &StoredVariable) -> StoreResult<()>;
    fn delete(&self, session_id: &str, var_id: VarId) -> StoreResult<()>;
    fn delete_session(&self, session_id: &str) -> StoreResult<()>;
    fn get(&self, session_id: &str, var_id: VarId) -> StoreResult<Option<StoredVariable>>;
    fn list_session(&self, session_id: &str) -> StoreResult<Vec<StoredVariable>>;
}

/// In-memory backend: no durability across restarts, used as the
/// default for hosted-runtime sessions that don't need it and for tests.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<(SessionId, VarId), StoredVariable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn put(&self, var: &StoredVariable) -> StoreResult<()> {
        self.rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((var.session_id.clone(), var.var_id), var.clone());
        Ok(())
    }

    fn delete(&self, session_id: &str, var_id: VarId) -> StoreResult<()> {
        self.rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&(session_id.to_owned(), var_id));
        Ok(())
    }

    fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        self.rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|(sid, _), _| sid != session_id);
        Ok(())
    }

    fn get(&self, session_id: &str, var_id: VarId) -> StoreResult<Option<StoredVariable>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(session_id.to_owned(), var_id))
            .cloned())
    }

    fn list_session(&self, session_id: &str) -> StoreResult<Vec<StoredVariable>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|v| v.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// SQLite backend. One connection guarded by a mutex — `rusqlite::Connection`
/// is `Send` but not `Sync`, and sessions call in from whichever
/// dispatcher task happens to touch storage, same constraint the
/// teacher's `receiver::db::Db` works around by owning the connection
/// behind a single task boundary; here a mutex is simpler since this
/// crate has no dispatcher of its own.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn integrity_check(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(StoreError::IntegrityCheckFailed(result));
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn put(&self, var: &StoredVariable) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let value_json = serde_json::to_string(&var.value)?;
        let properties_json = serde_json::to_string(&var.properties)?;
        conn.execute(
            "INSERT INTO variables (session_id, var_id, parent_id, value_json, properties)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id, var_id) DO UPDATE SET
                parent_id = excluded.parent_id,
                value_json = excluded.value_json,
                properties = excluded.properties",
            rusqlite::params![
                var.session_id,
                var.var_id,
                var.parent_id,
                value_json,
                properties_json,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, session_id: &str, var_id: VarId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute(
            "DELETE FROM variables WHERE session_id = ?1 AND var_id = ?2",
            rusqlite::params![session_id, var_id],
        )?;
        Ok(())
    }

    fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute(
            "DELETE FROM variables WHERE session_id = ?1",
            rusqlite::params![session_id],
        )?;
        Ok(())
    }

    fn get(&self, session_id: &str, var_id: VarId) -> StoreResult<Option<StoredVariable>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT parent_id, value_json, properties FROM variables
             WHERE session_id = ?1 AND var_id = ?2",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![session_id, var_id], |row| {
            let parent_id: Option<VarId> = row.get(0)?;
            let value_json: String = row.get(1)?;
            let properties_json: String = row.get(2)?;
            Ok((parent_id, value_json, properties_json))
        })?;
        let Some(row) = rows.next().transpose()? else {
            return Ok(None);
        };
        let (parent_id, value_json, properties_json) = row;
        Ok(Some(StoredVariable {
            session_id: session_id.to_owned(),
            var_id,
            parent_id,
            value: serde_json::from_str(&value_json)?,
            properties: serde_json::from_str(&properties_json)?,
        }))
    }

    fn list_session(&self, session_id: &str) -> StoreResult<Vec<StoredVariable>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT var_id, parent_id, value_json, properties FROM variables
             WHERE session_id = ?1 ORDER BY var_id",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id], |row| {
            let var_id: VarId = row.get(0)?;
            let parent_id: Option<VarId> = row.get(1)?;
            let value_json: String = row.get(2)?;
            let properties_json: String = row.get(3)?;
            Ok((var_id, parent_id, value_json, properties_json))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (var_id, parent_id, value_json, properties_json) = row?;
            out.push(StoredVariable {
                session_id: session_id.to_owned(),
                var_id,
                parent_id,
                value: serde_json::from_str(&value_json)?,
                properties: serde_json::from_str(&properties_json)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(session_id: &str, var_id: VarId) -> StoredVariable {
        StoredVariable {
            session_id: session_id.to_owned(),
            var_id,
            parent_id: Some(1),
            value: serde_json::json!({"name": "Alice"}),
            properties: Properties::new(),
        }
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        store.put(&sample("s1", 5)).unwrap();
        let got = store.get("s1", 5).unwrap().unwrap();
        assert_eq!(got.value, serde_json::json!({"name": "Alice"}));
        store.delete("s1", 5).unwrap();
        assert!(store.get("s1", 5).unwrap().is_none());
    }

    #[test]
    fn memory_store_scopes_by_session() {
        let store = MemoryStore::new();
        store.put(&sample("s1", 5)).unwrap();
        store.put(&sample("s2", 5)).unwrap();
        assert_eq!(store.list_session("s1").unwrap().len(), 1);
        store.delete_session("s1").unwrap();
        assert!(store.list_session("s1").unwrap().is_empty());
        assert_eq!(store.list_session("s2").unwrap().len(), 1);
    }

    #[test]
    fn sqlite_store_round_trips_and_passes_integrity_check() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&sample("s1", 5)).unwrap();
        let got = store.get("s1", 5).unwrap().unwrap();
        assert_eq!(got.parent_id, Some(1));
        assert_eq!(got.value, serde_json::json!({"name": "Alice"}));
        store.integrity_check().unwrap();
    }

    #[test]
    fn sqlite_store_update_on_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&sample("s1", 5)).unwrap();
        let mut updated = sample("s1", 5);
        updated.value = serde_json::json!({"name": "Bob"});
        store.put(&updated).unwrap();
        let got = store.get("s1", 5).unwrap().unwrap();
        assert_eq!(got.value, serde_json::json!({"name": "Bob"}));
        assert_eq!(store.list_session("s1").unwrap().len(), 1);
    }

    #[test]
    fn sqlite_store_delete_session_is_scoped() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&sample("s1", 5)).unwrap();
        store.put(&sample("s2", 6)).unwrap();
        store.delete_session("s1").unwrap();
        assert!(store.get("s1", 5).unwrap().is_none());
        assert!(store.get("s2", 6).unwrap().is_some());
    }
}
