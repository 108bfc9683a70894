//! `butler_registry`: switchboard's directory of peer daemons (§3).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct ButlerRegistryRow {
    pub name: String,
    pub endpoint_url: String,
    pub description: String,
    pub modules_json: Value,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

fn row_to_registry(row: sqlx::postgres::PgRow) -> Result<ButlerRegistryRow> {
    Ok(ButlerRegistryRow {
        name: row.try_get("name")?,
        endpoint_url: row.try_get("endpoint_url")?,
        description: row.try_get("description")?,
        modules_json: crate::normalize_jsonb(row.try_get("modules_json")?),
        registered_at: row.try_get("registered_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
    })
}

const COLUMNS: &str = "name, endpoint_url, description, modules_json, registered_at, last_seen_at";

pub async fn register(
    pool: &PgPool,
    name: &str,
    endpoint_url: &str,
    description: &str,
    modules_json: Value,
) -> Result<ButlerRegistryRow> {
    let row = sqlx::query(&format!(
        r#"
        insert into butler_registry (name, endpoint_url, description, modules_json, last_seen_at)
        values ($1, $2, $3, $4, now())
        on conflict (name) do update
            set endpoint_url = excluded.endpoint_url,
                description  = excluded.description,
                modules_json = excluded.modules_json,
                last_seen_at = now()
        returning {COLUMNS}
        "#
    ))
    .bind(name)
    .bind(endpoint_url)
    .bind(description)
    .bind(modules_json)
    .fetch_one(pool)
    .await
    .context("butler_registry register failed")?;
    row_to_registry(row)
}

pub async fn fetch(pool: &PgPool, name: &str) -> Result<Option<ButlerRegistryRow>> {
    let row = sqlx::query(&format!("select {COLUMNS} from butler_registry where name = $1"))
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("butler_registry fetch failed")?;
    row.map(row_to_registry).transpose()
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<ButlerRegistryRow>> {
    let rows = sqlx::query(&format!("select {COLUMNS} from butler_registry order by name asc"))
        .fetch_all(pool)
        .await
        .context("butler_registry list_all failed")?;
    rows.into_iter().map(row_to_registry).collect()
}

pub async fn touch_last_seen(pool: &PgPool, name: &str) -> Result<()> {
    sqlx::query("update butler_registry set last_seen_at = now() where name = $1")
        .bind(name)
        .execute(pool)
        .await
        .context("butler_registry touch_last_seen failed")?;
    Ok(())
}
