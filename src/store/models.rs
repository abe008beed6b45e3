use serde::{Deserialize, Serialize};

/// Durable marker and payload for one materialized root tree.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncRecord {
    pub node_id: String,
    pub tree_json: String,
    pub media_dir: Option<String>,
    pub materialized_at: String,
}

/// Outcome of an admit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    SkipAlreadyPresent,
}

/// How admit treats an id that is already recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitMode {
    /// Initial-crawl behavior: never refetch a captured id.
    SkipExisting,
    /// Overwrite behavior: purge the old copy, then proceed.
    PurgeExisting,
}
