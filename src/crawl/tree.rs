//! Recursive fetch of a content node and its full comment subtree.

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::attachments::{resolve_single, AttachmentResolver};
use super::planner::FieldSchema;
use crate::model::{Author, ContentNode};
use crate::source::raw::{decode_item, parse_timestamp, RawComment, RawFeedItem};
use crate::source::{PageCursor, PageRequest, SourceApi, SourceError};

/// Expands a root node into a complete tree: every page of every child
/// connection walked, attachments resolved to refs.
///
/// Any failure below a node propagates to the root call; a partial tree is
/// never returned as if complete.
pub struct TreeFetcher<'a> {
    client: &'a dyn SourceApi,
    resolver: AttachmentResolver<'a>,
}

impl<'a> TreeFetcher<'a> {
    #[must_use]
    pub const fn new(client: &'a dyn SourceApi) -> Self {
        Self {
            client,
            resolver: AttachmentResolver::new(client),
        }
    }

    /// Fetch a root node by id and expand its subtree.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or decode error anywhere in the subtree.
    pub async fn fetch_tree(
        &self,
        node_id: &str,
        schema: FieldSchema,
    ) -> Result<ContentNode, SourceError> {
        let raw = self
            .client
            .fetch_object(node_id, schema.feed_fields())
            .await?;
        self.complete_tree(&raw, schema).await
    }

    /// Expand a raw feed item, already fetched as part of a page, into a
    /// complete tree.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or decode error anywhere in the subtree.
    pub async fn complete_tree(
        &self,
        raw: &Value,
        schema: FieldSchema,
    ) -> Result<ContentNode, SourceError> {
        let item: RawFeedItem = decode_item(raw)?;

        let attachments = match &item.attachments {
            Some(group) => self.resolver.resolve(group).await?,
            None => Vec::new(),
        };
        let message = normalize_message(&item);
        let children = self.fetch_children(&item.id, schema).await?;

        Ok(ContentNode {
            id: item.id,
            author: Author {
                id: item.from.id,
                name: item.from.name,
            },
            created_at: parse_timestamp(&item.created_time)?,
            updated_at: parse_timestamp(&item.updated_time)?,
            message,
            attachments,
            children: Some(children),
        })
    }

    fn fetch_children<'b>(
        &'b self,
        node_id: &'b str,
        schema: FieldSchema,
    ) -> BoxFuture<'b, Result<Vec<ContentNode>, SourceError>> {
        Box::pin(async move {
            let request = PageRequest::comments(node_id, schema);
            let first = self.client.fetch_page(&request).await?;
            let mut cursor = PageCursor::new(self.client, first);
            let mut children = Vec::new();

            while let Some(item) = cursor.try_next().await? {
                let comment: RawComment = decode_item(&item)?;

                let attachments = match &comment.attachment {
                    Some(value) => resolve_single(value)?.into_iter().collect(),
                    None => Vec::new(),
                };

                // A zero child-count hint means no request at all, not an
                // empty one.
                let grandchildren = if comment.comment_count > 0 {
                    self.fetch_children(&comment.id, schema).await?
                } else {
                    Vec::new()
                };

                children.push(ContentNode {
                    id: comment.id,
                    author: Author {
                        id: comment.from.id,
                        name: comment.from.name,
                    },
                    created_at: parse_timestamp(&comment.created_time)?,
                    updated_at: parse_timestamp(&comment.updated_time)?,
                    message: comment.message.unwrap_or_default(),
                    attachments,
                    children: Some(grandchildren),
                });
            }

            Ok(children)
        })
    }
}

/// Recover link text the author typed and later deleted from the visible
/// message while the platform kept the link metadata.
fn normalize_message(item: &RawFeedItem) -> String {
    let message = item.message.clone().unwrap_or_default();
    if item.kind.as_deref() == Some("link") {
        if let Some(link) = &item.link {
            if !message.contains(link.as_str()) {
                return format!("{link}\n\n{message}");
            }
        }
    }
    message
}
