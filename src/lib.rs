//! Tree-corpus migration engine.
//!
//! Crawls a paginated source content API (posts, their recursive comment
//! trees, and attached media) into an idempotent local sync store, and
//! optionally publishes the captured trees to a destination API that
//! rejects duplicates.

pub mod blobs;
pub mod config;
pub mod crawl;
pub mod model;
pub mod publish;
pub mod source;
pub mod store;
