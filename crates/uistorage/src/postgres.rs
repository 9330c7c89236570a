//! Optional `postgres` backend for multi-process deployments, using
//! `sqlx::PgPool` the same way `server::db` pooled Postgres for the
//! teacher's dashboard API. Async because `sqlx` has no blocking API;
//! exposed as its own trait rather than forced into [`crate::Store`]'s
//! synchronous shape.

use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;

use uiproto::{Properties, VarId};

use crate::{SessionId, StoredVariable};

#[derive(Debug, Error)]
pub enum PgStoreError {
    #[error("postgres: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serializing properties: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PgStoreResult<T> = Result<T, PgStoreError>;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS variables (
    session_id  TEXT    NOT NULL,
    var_id      BIGINT  NOT NULL,
    parent_id   BIGINT,
    value_json  TEXT    NOT NULL,
    properties  TEXT    NOT NULL DEFAULT '{}',
    PRIMARY KEY (session_id, var_id)
);
CREATE INDEX IF NOT EXISTS variables_session_idx ON variables (session_id);
";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> PgStoreResult<Self> {
        let pool = PgPool::connect(url).await?;
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn put(&self, var: &StoredVariable) -> PgStoreResult<()> {
        let value_json = serde_json::to_string(&var.value)?;
        let properties_json = serde_json::to_string(&var.properties)?;
        sqlx::query(
            "INSERT INTO variables (session_id, var_id, parent_id, value_json, properties)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (session_id, var_id) DO UPDATE SET
                parent_id = excluded.parent_id,
                value_json = excluded.value_json,
                properties = excluded.properties",
        )
        .bind(&var.session_id)
        .bind(var.var_id as i64)
        .bind(var.parent_id.map(|p| p as i64))
        .bind(value_json)
        .bind(properties_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, session_id: &str, var_id: VarId) -> PgStoreResult<()> {
        sqlx::query("DELETE FROM variables WHERE session_id = $1 AND var_id = $2")
            .bind(session_id)
            .bind(var_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> PgStoreResult<()> {
        sqlx::query("DELETE FROM variables WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, session_id: &str, var_id: VarId) -> PgStoreResult<Option<StoredVariable>> {
        let row: Option<(Option<i64>, String, String)> = sqlx::query_as(
            "SELECT parent_id, value_json, properties FROM variables
             WHERE session_id = $1 AND var_id = $2",
        )
        .bind(session_id)
        .bind(var_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        let Some((parent_id, value_json, properties_json)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredVariable {
            session_id: session_id.to_owned(),
            var_id,
            parent_id: parent_id.map(|p| p as VarId),
            value: serde_json::from_str::<Value>(&value_json)?,
            properties: serde_json::from_str::<Properties>(&properties_json)?,
        }))
    }

    pub async fn list_session(&self, session_id: &str) -> PgStoreResult<Vec<StoredVariable>> {
        let rows: Vec<(i64, Option<i64>, String, String)> = sqlx::query_as(
            "SELECT var_id, parent_id, value_json, properties FROM variables
             WHERE session_id = $1 ORDER BY var_id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (var_id, parent_id, value_json, properties_json) in rows {
            out.push(StoredVariable {
                session_id: session_id.to_owned(),
                var_id: var_id as VarId,
                parent_id: parent_id.map(|p| p as VarId),
                value: serde_json::from_str(&value_json)?,
                properties: serde_json::from_str(&properties_json)?,
            });
        }
        Ok(out)
    }
}

// `SessionId` is re-exported for callers that want to name the type
// explicitly without reaching back into `crate`.
pub type PgSessionId = SessionId;
