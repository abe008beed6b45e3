//! Typed decode layer over the source API's raw JSON payloads.
//!
//! Pages and items arrive as loosely shaped JSON. Each component decodes the
//! fragment it consumes into a closed struct at its own boundary and fails
//! fast with [`SourceError::MalformedPage`] / [`SourceError::MalformedItem`]
//! instead of threading untyped maps through the pipeline.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::SourceError;

/// One page of a paginated collection.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPage {
    pub data: Vec<Value>,
    #[serde(default)]
    pub paging: Option<RawPaging>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPaging {
    #[serde(default)]
    pub next: Option<String>,
}

impl RawPage {
    /// Decode a page from a raw response body.
    pub fn from_body(body: &str) -> Result<Self, SourceError> {
        serde_json::from_str(body).map_err(|e| SourceError::MalformedPage(e.to_string()))
    }

    /// Decode a page embedded inline in a parent payload, as attachment
    /// groups are.
    pub fn from_value(value: &Value) -> Result<Self, SourceError> {
        serde_json::from_value(value.clone())
            .map_err(|e| SourceError::MalformedPage(e.to_string()))
    }
}

/// Decode one raw collection item into its typed form.
pub fn decode_item<T: DeserializeOwned>(value: &Value) -> Result<T, SourceError> {
    serde_json::from_value(value.clone()).map_err(|e| SourceError::MalformedItem(e.to_string()))
}

/// Parse a source timestamp.
///
/// The API emits RFC 3339 for newer content and a compact numeric offset
/// (`2012-03-01T09:00:00+0000`) for older records.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SourceError> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| SourceError::MalformedItem(format!("invalid timestamp {value:?}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAuthor {
    pub id: String,
    pub name: String,
}

/// Bare node id, decoded ahead of the full item so admit decisions happen
/// before any further fetching.
#[derive(Debug, Clone, Deserialize)]
pub struct RawIdent {
    pub id: String,
}

/// A root item from the collection feed.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFeedItem {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub from: RawAuthor,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    pub created_time: String,
    pub updated_time: String,
    /// Inline paginated attachment group; absent under the reduced schema.
    #[serde(default)]
    pub attachments: Option<Value>,
}

/// A comment (or reply) from a node's children connection.
#[derive(Debug, Clone, Deserialize)]
pub struct RawComment {
    pub id: String,
    pub from: RawAuthor,
    #[serde(default)]
    pub message: Option<String>,
    pub created_time: String,
    pub updated_time: String,
    /// Singular attachment, unlike the group carried by feed items.
    #[serde(default)]
    pub attachment: Option<Value>,
    #[serde(default)]
    pub comment_count: i64,
}

/// One item of an attachment group.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub media: Option<RawMedia>,
    /// Nested paginated group; walked to whatever depth is present.
    #[serde(default)]
    pub subattachments: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMedia {
    pub image: RawImage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawImage {
    pub src: String,
}

/// A collection search hit.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSearchHit {
    pub id: String,
    pub name: String,
}
