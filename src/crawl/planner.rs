//! Decides which field schema and time window each crawl sweep requests.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The source API rejects the full field list for content predating this
/// moment, so requests on that side of the boundary use the reduced schema.
/// Overridable through `SCHEMA_CUTOFF`.
pub const DEFAULT_SCHEMA_CUTOFF: &str = "2014-04-30T00:00:00Z";

/// Which field list a fetch request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSchema {
    Full,
    Reduced,
}

impl FieldSchema {
    #[must_use]
    pub const fn feed_fields(self) -> &'static [&'static str] {
        match self {
            Self::Full => &[
                "id",
                "type",
                "from",
                "message",
                "link",
                "created_time",
                "updated_time",
                "attachments",
            ],
            Self::Reduced => &["id", "from", "message", "created_time", "updated_time"],
        }
    }

    #[must_use]
    pub const fn comment_fields(self) -> &'static [&'static str] {
        match self {
            Self::Full => &[
                "id",
                "from",
                "message",
                "created_time",
                "updated_time",
                "attachment",
                "comment_count",
            ],
            Self::Reduced => &[
                "id",
                "from",
                "message",
                "created_time",
                "updated_time",
                "comment_count",
            ],
        }
    }
}

/// Half-open time bounds for one sweep. `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// The three crawl entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Cover the whole collection: recent content with the full schema,
    /// older content with the reduced one.
    Initial,
    /// Pick up everything since the last sync point.
    Forward,
    /// Like `Forward`, but nodes already captured inside the window are
    /// purged and refetched so edits are picked up.
    Overwrite,
}

/// One planner-emitted sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub window: CrawlWindow,
    pub schema: FieldSchema,
    pub overwrite: bool,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("forward sync requires a prior sync point")]
    MissingSyncPoint,
}

/// Partitions a crawl into sweeps that never straddle the schema cutoff.
#[derive(Debug, Clone, Copy)]
pub struct CrawlPlanner {
    cutoff: DateTime<Utc>,
}

impl CrawlPlanner {
    #[must_use]
    pub const fn new(cutoff: DateTime<Utc>) -> Self {
        Self { cutoff }
    }

    #[must_use]
    pub const fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// Produce the sweeps covering the collection for the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::MissingSyncPoint`] when a forward or overwrite
    /// sync is requested without a recorded sync point. Planner errors are
    /// fatal to the run.
    pub fn plan(
        &self,
        mode: CrawlMode,
        last_sync: Option<DateTime<Utc>>,
    ) -> Result<Vec<FetchRequest>, PlanError> {
        match mode {
            CrawlMode::Initial => Ok(vec![
                FetchRequest {
                    window: CrawlWindow {
                        since: Some(self.cutoff),
                        until: None,
                    },
                    schema: FieldSchema::Full,
                    overwrite: false,
                },
                FetchRequest {
                    window: CrawlWindow {
                        since: None,
                        until: Some(self.cutoff),
                    },
                    schema: FieldSchema::Reduced,
                    overwrite: false,
                },
            ]),
            CrawlMode::Forward => self.forward(last_sync, false),
            CrawlMode::Overwrite => self.forward(last_sync, true),
        }
    }

    fn forward(
        &self,
        last_sync: Option<DateTime<Utc>>,
        overwrite: bool,
    ) -> Result<Vec<FetchRequest>, PlanError> {
        let since = last_sync.ok_or(PlanError::MissingSyncPoint)?;
        if since >= self.cutoff {
            return Ok(vec![FetchRequest {
                window: CrawlWindow {
                    since: Some(since),
                    until: None,
                },
                schema: FieldSchema::Full,
                overwrite,
            }]);
        }

        // A sync point behind the cutoff would make one window straddle the
        // schema boundary; split it instead.
        Ok(vec![
            FetchRequest {
                window: CrawlWindow {
                    since: Some(self.cutoff),
                    until: None,
                },
                schema: FieldSchema::Full,
                overwrite,
            },
            FetchRequest {
                window: CrawlWindow {
                    since: Some(since),
                    until: Some(self.cutoff),
                },
                schema: FieldSchema::Reduced,
                overwrite,
            },
        ])
    }
}
