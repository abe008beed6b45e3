//! Idempotent persistence layer for materialized trees.
//!
//! An explicit key-value index (one row per root node id) is the sole
//! durable idempotency signal; media files live beside it but never stand
//! in for it.

mod migrations;
mod models;
mod queries;

pub use models::*;
pub use queries::*;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::blobs::BlobTransfer;
use crate::model::ContentNode;

const LAST_SYNC_KEY: &str = "last_sync_at";

#[derive(Debug, Clone)]
pub struct SyncStore {
    pool: SqlitePool,
    media_root: PathBuf,
}

impl SyncStore {
    /// Open the store, running migrations if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, migrations fail, or the
    /// media root cannot be created.
    pub async fn new(path: &Path, media_root: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        migrations::run(&pool).await?;
        info!("Sync store migrations complete");

        tokio::fs::create_dir_all(media_root)
            .await
            .with_context(|| format!("Failed to create media root: {}", media_root.display()))?;

        Ok(Self {
            pool,
            media_root: media_root.to_path_buf(),
        })
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Media directory assigned to one root node's blobs.
    #[must_use]
    pub fn media_dir_for(&self, node_id: &str) -> PathBuf {
        self.media_root.join(node_id)
    }

    /// Decide whether a node id should be captured.
    ///
    /// # Errors
    ///
    /// Returns an error if the index lookup or a purge fails.
    pub async fn admit(&self, node_id: &str, mode: AdmitMode) -> Result<Admission> {
        if !record_exists(&self.pool, node_id).await? {
            return Ok(Admission::Proceed);
        }
        match mode {
            AdmitMode::SkipExisting => Ok(Admission::SkipAlreadyPresent),
            AdmitMode::PurgeExisting => {
                self.purge(node_id).await?;
                Ok(Admission::Proceed)
            }
        }
    }

    /// Remove a node's record and its fetched media.
    ///
    /// The index row goes first: an interrupted replacement then reads as
    /// absent, never as a silently stale copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the row delete or the media removal fails.
    pub async fn purge(&self, node_id: &str) -> Result<()> {
        debug!(node_id = %node_id, "Purging sync record");
        delete_record(&self.pool, node_id).await?;

        let media_dir = self.media_dir_for(node_id);
        if media_dir.exists() {
            tokio::fs::remove_dir_all(&media_dir)
                .await
                .with_context(|| format!("Failed to remove media dir: {}", media_dir.display()))?;
        }
        Ok(())
    }

    /// Resolve every remote attachment in the tree to a local handle, then
    /// durably record the tree keyed by its root id.
    ///
    /// Each ref is fetched at most once; refs that already carry a handle
    /// are left untouched. A failed download is logged and its ref left
    /// unresolved; the node still persists.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the record write fails.
    pub async fn materialize(&self, node: &mut ContentNode, blobs: &dyn BlobTransfer) -> Result<()> {
        let media_dir = self.media_dir_for(&node.id);
        resolve_attachments(node, blobs, &media_dir).await;

        let tree_json =
            serde_json::to_string(node).context("Failed to serialize materialized tree")?;
        let media_dir_value = media_dir.exists().then(|| media_dir.display().to_string());
        upsert_record(&self.pool, &node.id, &tree_json, media_dir_value.as_deref()).await?;
        debug!(node_id = %node.id, "Materialized tree recorded");
        Ok(())
    }

    /// Reconstruct a materialized tree without contacting the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or the stored payload does not
    /// decode.
    pub async fn load_tree(&self, node_id: &str) -> Result<Option<ContentNode>> {
        let Some(record) = get_record(&self.pool, node_id).await? else {
            return Ok(None);
        };
        let node = serde_json::from_str(&record.tree_json)
            .with_context(|| format!("Corrupt tree payload for {node_id}"))?;
        Ok(Some(node))
    }

    /// The sync point recorded by the last successful crawl.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or the stored value does not
    /// parse.
    pub async fn last_sync_point(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = get_meta(&self.pool, LAST_SYNC_KEY).await? else {
            return Ok(None);
        };
        let at = DateTime::parse_from_rfc3339(&value)
            .with_context(|| format!("Corrupt sync point {value:?}"))?;
        Ok(Some(at.with_timezone(&Utc)))
    }

    /// Record the sync point for the next forward crawl.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set_last_sync_point(&self, at: DateTime<Utc>) -> Result<()> {
        set_meta(&self.pool, LAST_SYNC_KEY, &at.to_rfc3339()).await
    }
}

fn resolve_attachments<'a>(
    node: &'a mut ContentNode,
    blobs: &'a dyn BlobTransfer,
    media_dir: &'a Path,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let node_id = node.id.clone();
        for attachment in &mut node.attachments {
            if attachment.is_resolved() {
                continue;
            }
            match blobs.fetch(attachment.remote_url(), media_dir).await {
                Ok(handle) => attachment.set_local_handle(handle),
                Err(e) => warn!(
                    node_id = %node_id,
                    url = %attachment.remote_url(),
                    "Attachment fetch failed: {e:#}"
                ),
            }
        }
        if let Some(children) = &mut node.children {
            for child in children {
                resolve_attachments(child, blobs, media_dir).await;
            }
        }
    })
}
