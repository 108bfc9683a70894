//! KV state store: `(key, value_json, version)` with a compare-and-set
//! write path. Generalized from the teacher's singleton-row
//! `persist_arm_state`/`load_arm_state` upsert into an arbitrary-key store.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct KvState {
    pub key: String,
    pub value_json: Value,
    pub version: i64,
}

#[derive(Debug, Error)]
pub enum CasError {
    #[error("cas conflict on key '{key}': expected version {expected}")]
    Conflict { key: String, expected: i64 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Read the current value for `key`, if any.
pub async fn state_get(pool: &PgPool, key: &str) -> Result<Option<KvState>> {
    let row = sqlx::query("select key, value_json, version from kv_state where key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("state_get failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(KvState {
        key: row.try_get("key")?,
        value_json: crate::normalize_jsonb(row.try_get("value_json")?),
        version: row.try_get("version")?,
    }))
}

/// Unconditional upsert: creates the row at version 1 if absent, otherwise
/// overwrites the value and bumps the version by 1 regardless of its
/// current value.
pub async fn state_set(pool: &PgPool, key: &str, value: Value) -> Result<KvState> {
    let row = sqlx::query(
        r#"
        insert into kv_state (key, value_json, version, updated_at)
        values ($1, $2, 1, now())
        on conflict (key) do update
            set value_json = excluded.value_json,
                version    = kv_state.version + 1,
                updated_at = now()
        returning key, value_json, version
        "#,
    )
    .bind(key)
    .bind(&value)
    .fetch_one(pool)
    .await
    .context("state_set failed")?;

    Ok(KvState {
        key: row.try_get("key")?,
        value_json: crate::normalize_jsonb(row.try_get("value_json")?),
        version: row.try_get("version")?,
    })
}

/// Atomically update `(value, version)` where the current `version` equals
/// `expected_version`, incrementing `version` by 1. Fails with
/// [`CasError::Conflict`] if no row matches — either the key is absent or
/// another writer has already advanced the version.
pub async fn state_compare_and_set(
    pool: &PgPool,
    key: &str,
    expected_version: i64,
    new_value: Value,
) -> Result<KvState, CasError> {
    let row = sqlx::query(
        r#"
        update kv_state
           set value_json = $3,
               version    = version + 1,
               updated_at = now()
         where key = $1
           and version = $2
        returning key, value_json, version
        "#,
    )
    .bind(key)
    .bind(expected_version)
    .bind(&new_value)
    .fetch_optional(pool)
    .await
    .context("state_compare_and_set failed")?;

    let Some(row) = row else {
        return Err(CasError::Conflict {
            key: key.to_string(),
            expected: expected_version,
        });
    };

    Ok(KvState {
        key: row.try_get("key").map_err(anyhow::Error::from)?,
        value_json: crate::normalize_jsonb(row.try_get("value_json").map_err(anyhow::Error::from)?),
        version: row.try_get("version").map_err(anyhow::Error::from)?,
    })
}
