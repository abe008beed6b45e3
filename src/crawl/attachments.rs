//! Flattens raw attachment groups into ordered [`AttachmentRef`]s.

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::model::AttachmentRef;
use crate::source::raw::{decode_item, RawAttachment, RawPage};
use crate::source::{PageCursor, SourceApi, SourceError};

/// Walks a node's raw attachment group, which is itself paginated and may
/// nest further paginated `subattachments` groups.
pub struct AttachmentResolver<'a> {
    client: &'a dyn SourceApi,
}

impl<'a> AttachmentResolver<'a> {
    #[must_use]
    pub const fn new(client: &'a dyn SourceApi) -> Self {
        Self { client }
    }

    /// Flatten a raw attachment group into refs, depth-first: an item, then
    /// its own subattachments, before the next sibling.
    ///
    /// # Errors
    ///
    /// Fails when a group page or a recognized item is malformed.
    pub async fn resolve(&self, group: &Value) -> Result<Vec<AttachmentRef>, SourceError> {
        let mut refs = Vec::new();
        self.walk(group, &mut refs).await?;
        Ok(refs)
    }

    fn walk<'b>(
        &'b self,
        group: &'b Value,
        out: &'b mut Vec<AttachmentRef>,
    ) -> BoxFuture<'b, Result<(), SourceError>> {
        Box::pin(async move {
            let page = RawPage::from_value(group)?;
            let mut cursor = PageCursor::new(self.client, page);
            while let Some(item) = cursor.try_next().await? {
                let attachment: RawAttachment = decode_item(&item)?;
                if let Some(resolved) = classify(&attachment)? {
                    out.push(resolved);
                }
                if let Some(sub) = &attachment.subattachments {
                    self.walk(sub, out).await?;
                }
            }
            Ok(())
        })
    }
}

/// Resolve a comment's singular attachment field.
///
/// # Errors
///
/// Fails when a recognized attachment kind is missing its payload.
pub fn resolve_single(value: &Value) -> Result<Option<AttachmentRef>, SourceError> {
    let attachment: RawAttachment = decode_item(value)?;
    classify(&attachment)
}

/// Classify one raw attachment by its tag. Unrecognized tags are dropped
/// silently: the source emits kinds irrelevant to migration, such as
/// link-share cards.
fn classify(attachment: &RawAttachment) -> Result<Option<AttachmentRef>, SourceError> {
    match attachment.kind.as_str() {
        "photo" => {
            let media = attachment
                .media
                .as_ref()
                .ok_or_else(|| SourceError::MalformedItem("photo attachment without media".to_string()))?;
            Ok(Some(AttachmentRef::Picture {
                remote_url: media.image.src.clone(),
                local_handle: None,
            }))
        }
        "file_upload" => {
            let title = attachment
                .title
                .clone()
                .ok_or_else(|| SourceError::MalformedItem("file_upload without title".to_string()))?;
            let url = attachment
                .url
                .clone()
                .ok_or_else(|| SourceError::MalformedItem("file_upload without url".to_string()))?;
            Ok(Some(AttachmentRef::FileUpload {
                title,
                remote_url: url,
                local_handle: None,
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::source::PageRequest;

    /// Groups in these tests are fully inline, so the client must never be
    /// asked for another page.
    struct NoFetchSource;

    #[async_trait]
    impl SourceApi for NoFetchSource {
        async fn fetch_page(&self, _request: &PageRequest) -> Result<RawPage, SourceError> {
            panic!("inline attachment groups need no page fetch");
        }

        async fn fetch_next(&self, url: &str) -> Result<RawPage, SourceError> {
            panic!("inline attachment groups need no continuation fetch: {url}");
        }

        async fn fetch_object(&self, _id: &str, _fields: &[&str]) -> Result<Value, SourceError> {
            panic!("inline attachment groups need no object fetch");
        }
    }

    fn photo(src: &str) -> Value {
        json!({"type": "photo", "media": {"image": {"src": src}}})
    }

    #[tokio::test]
    async fn flattening_is_depth_first() {
        let group = json!({
            "data": [
                {
                    "type": "photo",
                    "media": {"image": {"src": "https://cdn.test/one.jpg"}},
                    "subattachments": {"data": [
                        photo("https://cdn.test/one-a.jpg"),
                        photo("https://cdn.test/one-b.jpg"),
                    ]}
                },
                {"type": "file_upload", "title": "minutes", "url": "https://cdn.test/minutes.pdf"}
            ]
        });

        let resolver = AttachmentResolver::new(&NoFetchSource);
        let refs = resolver.resolve(&group).await.unwrap();

        let urls: Vec<&str> = refs.iter().map(AttachmentRef::remote_url).collect();
        assert_eq!(
            urls,
            [
                "https://cdn.test/one.jpg",
                "https://cdn.test/one-a.jpg",
                "https://cdn.test/one-b.jpg",
                "https://cdn.test/minutes.pdf",
            ]
        );
        assert_eq!(refs[3].title(), Some("minutes"));
    }

    #[tokio::test]
    async fn unrecognized_kinds_are_dropped_silently() {
        let group = json!({
            "data": [
                {"type": "share", "url": "https://elsewhere.test/card"},
                photo("https://cdn.test/kept.jpg"),
                {"type": "album"}
            ]
        });

        let resolver = AttachmentResolver::new(&NoFetchSource);
        let refs = resolver.resolve(&group).await.unwrap();

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].remote_url(), "https://cdn.test/kept.jpg");
    }

    #[tokio::test]
    async fn recognized_kind_with_missing_payload_is_malformed() {
        let group = json!({"data": [{"type": "photo"}]});
        let resolver = AttachmentResolver::new(&NoFetchSource);
        assert!(matches!(
            resolver.resolve(&group).await,
            Err(SourceError::MalformedItem(_))
        ));
    }

    #[test]
    fn singular_attachment_resolves_photos_and_files() {
        let resolved = resolve_single(&photo("https://cdn.test/c.jpg")).unwrap();
        assert_eq!(resolved.unwrap().remote_url(), "https://cdn.test/c.jpg");

        let dropped = resolve_single(&json!({"type": "sticker"})).unwrap();
        assert!(dropped.is_none());
    }
}
