//! Crawl orchestration: planner sweeps driven through the tree fetcher and
//! into the sync store.

pub mod attachments;
pub mod planner;
pub mod tree;

pub use attachments::AttachmentResolver;
pub use planner::{CrawlMode, CrawlPlanner, CrawlWindow, FetchRequest, FieldSchema, PlanError};
pub use tree::TreeFetcher;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::blobs::BlobTransfer;
use crate::source::raw::{decode_item, RawIdent};
use crate::source::{PageCursor, PageRequest, SourceApi};
use crate::store::{AdmitMode, Admission, SyncStore};

/// Counters for one crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub admitted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Ids of failed roots, reported so a re-run can target just them.
    pub failed_ids: Vec<String>,
}

pub struct Crawler<'a> {
    source: &'a dyn SourceApi,
    store: &'a SyncStore,
    blobs: &'a dyn BlobTransfer,
    planner: CrawlPlanner,
    collection_id: String,
}

impl<'a> Crawler<'a> {
    pub fn new(
        source: &'a dyn SourceApi,
        store: &'a SyncStore,
        blobs: &'a dyn BlobTransfer,
        planner: CrawlPlanner,
        collection_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            store,
            blobs,
            planner,
            collection_id: collection_id.into(),
        }
    }

    /// Run a crawl in the given mode.
    ///
    /// A failed root aborts only its own subtree; the sweep continues with
    /// the next root. A failed sweep (broken feed page) aborts the run, and
    /// the sync point is left untouched so the next run covers the same
    /// window again.
    ///
    /// # Errors
    ///
    /// Returns planner errors and sweep-level fetch failures.
    pub async fn run(&self, mode: CrawlMode) -> Result<CrawlSummary> {
        let started_at = Utc::now();
        let last_sync = self.store.last_sync_point().await?;
        let requests = self.planner.plan(mode, last_sync)?;

        let mut summary = CrawlSummary::default();
        for request in &requests {
            self.run_sweep(request, &mut summary).await?;
        }

        self.store.set_last_sync_point(started_at).await?;

        info!(
            admitted = summary.admitted,
            skipped = summary.skipped,
            failed = summary.failed,
            "Crawl complete"
        );
        Ok(summary)
    }

    /// Re-capture a single root by id, replacing any existing record.
    ///
    /// # Errors
    ///
    /// Returns any fetch, decode, or store failure for that root.
    pub async fn capture_root(&self, node_id: &str, schema: FieldSchema) -> Result<()> {
        self.store.admit(node_id, AdmitMode::PurgeExisting).await?;
        let fetcher = TreeFetcher::new(self.source);
        let mut tree = fetcher
            .fetch_tree(node_id, schema)
            .await
            .with_context(|| format!("Failed to fetch tree for {node_id}"))?;
        self.store.materialize(&mut tree, self.blobs).await?;
        Ok(())
    }

    async fn run_sweep(&self, request: &FetchRequest, summary: &mut CrawlSummary) -> Result<()> {
        debug!(schema = ?request.schema, window = ?request.window, "Starting sweep");

        let feed = PageRequest::feed(&self.collection_id, request.schema, &request.window);
        let first = self
            .source
            .fetch_page(&feed)
            .await
            .context("Failed to fetch collection feed")?;
        let mut cursor = PageCursor::new(self.source, first);

        let admit_mode = if request.overwrite {
            AdmitMode::PurgeExisting
        } else {
            AdmitMode::SkipExisting
        };

        while let Some(raw) = cursor.try_next().await? {
            let ident: RawIdent = match decode_item(&raw) {
                Ok(ident) => ident,
                Err(e) => {
                    error!("Skipping root with undecodable payload: {e:#}");
                    summary.failed += 1;
                    continue;
                }
            };

            match self
                .process_root(&ident.id, &raw, request.schema, admit_mode)
                .await
            {
                Ok(Admission::Proceed) => summary.admitted += 1,
                Ok(Admission::SkipAlreadyPresent) => summary.skipped += 1,
                Err(e) => {
                    error!(node_id = %ident.id, "Failed to capture root: {e:#}");
                    summary.failed += 1;
                    summary.failed_ids.push(ident.id);
                }
            }
        }

        Ok(())
    }

    async fn process_root(
        &self,
        node_id: &str,
        raw: &Value,
        schema: FieldSchema,
        admit_mode: AdmitMode,
    ) -> Result<Admission> {
        match self.store.admit(node_id, admit_mode).await? {
            Admission::SkipAlreadyPresent => {
                debug!(node_id = %node_id, "Already captured, skipping");
                return Ok(Admission::SkipAlreadyPresent);
            }
            Admission::Proceed => {}
        }

        let fetcher = TreeFetcher::new(self.source);
        let mut tree = fetcher.complete_tree(raw, schema).await?;
        self.store.materialize(&mut tree, self.blobs).await?;
        Ok(Admission::Proceed)
    }
}
