//! Core domain types: posts, comments, and their attached media.
//!
//! A post and a comment share one shape ([`ContentNode`]) and nest
//! recursively: a post's children are its comments, a comment's children are
//! its replies.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display name and opaque id of a node's author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
}

/// A media reference carried by a content node.
///
/// `local_handle` is set once the blob has been fetched into the sync
/// store's media directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentRef {
    Picture {
        remote_url: String,
        #[serde(default)]
        local_handle: Option<PathBuf>,
    },
    FileUpload {
        title: String,
        remote_url: String,
        #[serde(default)]
        local_handle: Option<PathBuf>,
    },
}

impl AttachmentRef {
    #[must_use]
    pub fn remote_url(&self) -> &str {
        match self {
            Self::Picture { remote_url, .. } | Self::FileUpload { remote_url, .. } => remote_url,
        }
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Picture { .. } => None,
            Self::FileUpload { title, .. } => Some(title),
        }
    }

    #[must_use]
    pub fn local_handle(&self) -> Option<&Path> {
        match self {
            Self::Picture { local_handle, .. } | Self::FileUpload { local_handle, .. } => {
                local_handle.as_deref()
            }
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.local_handle().is_some()
    }

    pub(crate) fn set_local_handle(&mut self, handle: PathBuf) {
        match self {
            Self::Picture { local_handle, .. } | Self::FileUpload { local_handle, .. } => {
                *local_handle = Some(handle);
            }
        }
    }
}

/// A post or comment, with its subtree.
///
/// `children` distinguishes "not yet fetched" (`None`) from "fetched and
/// empty" (`Some(vec![])`). It is never exposed partially populated: either
/// every page of a node's children has been walked, or the field is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub children: Option<Vec<ContentNode>>,
}

impl ContentNode {
    /// Count attachment refs in this node and its subtree that still point
    /// only at a remote URL.
    #[must_use]
    pub fn unresolved_attachment_count(&self) -> usize {
        let own = self
            .attachments
            .iter()
            .filter(|a| !a.is_resolved())
            .count();
        let nested: usize = self
            .children
            .iter()
            .flatten()
            .map(Self::unresolved_attachment_count)
            .sum();
        own + nested
    }
}
