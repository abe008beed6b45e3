use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::SyncRecord;

// ========== Sync records ==========

/// Check whether a node id has already been materialized.
pub async fn record_exists(pool: &SqlitePool, node_id: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM sync_records WHERE node_id = ?")
        .bind(node_id)
        .fetch_optional(pool)
        .await
        .context("Failed to check sync record")?;
    Ok(row.is_some())
}

/// Get a sync record by node id.
pub async fn get_record(pool: &SqlitePool, node_id: &str) -> Result<Option<SyncRecord>> {
    sqlx::query_as("SELECT * FROM sync_records WHERE node_id = ?")
        .bind(node_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch sync record")
}

/// Insert or replace a sync record.
pub async fn upsert_record(
    pool: &SqlitePool,
    node_id: &str,
    tree_json: &str,
    media_dir: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT OR REPLACE INTO sync_records (node_id, tree_json, media_dir)
        VALUES (?, ?, ?)
        ",
    )
    .bind(node_id)
    .bind(tree_json)
    .bind(media_dir)
    .execute(pool)
    .await
    .context("Failed to upsert sync record")?;

    Ok(())
}

/// Delete a sync record.
pub async fn delete_record(pool: &SqlitePool, node_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sync_records WHERE node_id = ?")
        .bind(node_id)
        .execute(pool)
        .await
        .context("Failed to delete sync record")?;

    Ok(())
}

/// List every materialized root id, oldest first.
pub async fn list_record_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT node_id FROM sync_records ORDER BY materialized_at, node_id")
            .fetch_all(pool)
            .await
            .context("Failed to list sync records")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ========== Sync meta ==========

/// Get a sync metadata value.
pub async fn get_meta(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch sync meta")?;
    Ok(row.map(|(value,)| value))
}

/// Set a sync metadata value.
pub async fn set_meta(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await
        .context("Failed to set sync meta")?;

    Ok(())
}
