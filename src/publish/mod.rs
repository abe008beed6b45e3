//! Destination collaborator boundary and the publishing walk.
//!
//! The destination owns its own idempotency: a duplicate create comes back
//! as [`CreateOutcome::Conflict`], which the publisher treats as a skip,
//! never as a failure.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::ContentNode;

/// Destination-assigned identifier for a created node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestId(pub String);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("destination request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },
    #[error("destination transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed destination response: {0}")]
    MalformedResponse(String),
    #[error("failed to read blob {path}: {source}")]
    BlobRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a create call. A duplicate is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(DestId),
    Conflict,
}

/// Flat, already-resolved view of a node handed to the destination.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDraft {
    pub source_id: String,
    pub author_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Only set when the node was edited after creation.
    pub updated_at: Option<DateTime<Utc>>,
    pub attachments: Vec<DraftAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftAttachment {
    pub title: Option<String>,
    pub url: String,
}

/// Post-creation patch. Author attribution cannot be set at create time and
/// is applied as a separate edit.
#[derive(Debug, Clone, Serialize)]
pub struct NodePatch {
    pub author_name: String,
}

/// The destination API boundary.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Create a node under `parent` (`None` for a root).
    async fn create_node(
        &self,
        parent: Option<&DestId>,
        draft: &NodeDraft,
    ) -> Result<CreateOutcome, PublishError>;

    /// Patch an existing node.
    async fn edit_node(&self, id: &DestId, patch: &NodePatch) -> Result<(), PublishError>;

    /// Upload a locally materialized blob, returning its destination URL.
    async fn publish_blob(&self, local: &Path) -> Result<String, PublishError>;
}

/// Counters for one publishing walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishSummary {
    pub created: usize,
    pub conflicts: usize,
}

/// Pushes materialized trees to a destination, depth-first.
pub struct Publisher<'a> {
    dest: &'a dyn Destination,
    upload_media: bool,
}

impl<'a> Publisher<'a> {
    #[must_use]
    pub const fn new(dest: &'a dyn Destination, upload_media: bool) -> Self {
        Self {
            dest,
            upload_media,
        }
    }

    /// Push one materialized tree.
    ///
    /// A conflict on a node skips that node and its subtree: the
    /// destination already captured both when it first accepted the node.
    /// Siblings continue.
    ///
    /// # Errors
    ///
    /// Returns destination request failures other than conflicts.
    pub async fn publish_tree(&self, root: &ContentNode) -> Result<PublishSummary> {
        let mut summary = PublishSummary::default();
        self.publish_node(root, None, &mut summary).await?;
        Ok(summary)
    }

    fn publish_node<'b>(
        &'b self,
        node: &'b ContentNode,
        parent: Option<&'b DestId>,
        summary: &'b mut PublishSummary,
    ) -> BoxFuture<'b, Result<()>> {
        Box::pin(async move {
            let draft = self.draft_for(node).await?;
            match self.dest.create_node(parent, &draft).await? {
                CreateOutcome::Conflict => {
                    debug!(node_id = %node.id, "Duplicate at destination, skipping subtree");
                    summary.conflicts += 1;
                }
                CreateOutcome::Created(dest_id) => {
                    summary.created += 1;
                    self.dest
                        .edit_node(
                            &dest_id,
                            &NodePatch {
                                author_name: node.author.name.clone(),
                            },
                        )
                        .await?;
                    if let Some(children) = &node.children {
                        for child in children {
                            self.publish_node(child, Some(&dest_id), summary).await?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// Build the destination draft, publishing local media first when
    /// enabled. Unresolved refs fall back to their remote URL.
    async fn draft_for(&self, node: &ContentNode) -> Result<NodeDraft> {
        let mut attachments = Vec::new();
        for attachment in &node.attachments {
            let url = match (self.upload_media, attachment.local_handle()) {
                (true, Some(path)) => self
                    .dest
                    .publish_blob(path)
                    .await
                    .with_context(|| format!("Failed to publish blob for {}", node.id))?,
                _ => attachment.remote_url().to_string(),
            };
            attachments.push(DraftAttachment {
                title: attachment.title().map(ToString::to_string),
                url,
            });
        }

        Ok(NodeDraft {
            source_id: node.id.clone(),
            author_name: node.author.name.clone(),
            message: node.message.clone(),
            created_at: node.created_at,
            updated_at: (node.updated_at != node.created_at).then_some(node.updated_at),
            attachments,
        })
    }
}

/// HTTP implementation of [`Destination`].
pub struct HttpDestination {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpDestination {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    #[serde(flatten)]
    draft: &'a NodeDraft,
    parent: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadedResponse {
    url: String,
}

#[async_trait]
impl Destination for HttpDestination {
    async fn create_node(
        &self,
        parent: Option<&DestId>,
        draft: &NodeDraft,
    ) -> Result<CreateOutcome, PublishError> {
        let body = CreateBody {
            draft,
            parent: parent.map(|p| p.0.as_str()),
        };
        let response = self
            .client
            .post(format!("{}/nodes", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Ok(CreateOutcome::Conflict);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PublishError::RequestFailed {
                status: status.as_u16(),
                message,
            });
        }

        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| PublishError::MalformedResponse(e.to_string()))?;
        Ok(CreateOutcome::Created(DestId(created.id)))
    }

    async fn edit_node(&self, id: &DestId, patch: &NodePatch) -> Result<(), PublishError> {
        let response = self
            .client
            .patch(format!("{}/nodes/{}", self.base_url, id.0))
            .bearer_auth(&self.access_token)
            .json(patch)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PublishError::RequestFailed {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    async fn publish_blob(&self, local: &Path) -> Result<String, PublishError> {
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|source| PublishError::BlobRead {
                path: local.display().to_string(),
                source,
            })?;
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let response = self
            .client
            .post(format!("{}/media", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[("name", name.as_str())])
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PublishError::RequestFailed {
                status: status.as_u16(),
                message,
            });
        }

        let uploaded: UploadedResponse = response
            .json()
            .await
            .map_err(|e| PublishError::MalformedResponse(e.to_string()))?;
        Ok(uploaded.url)
    }
}
