//! Remote source collaborator: typed page requests, pagination, retry.

pub mod page;
pub mod raw;

pub use page::PageCursor;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::crawl::planner::{CrawlWindow, FieldSchema};
use raw::RawPage;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Page payload is missing its required shape.
    #[error("malformed page: {0}")]
    MalformedPage(String),
    /// An item inside a page is missing its required shape.
    #[error("malformed item: {0}")]
    MalformedItem(String),
    /// The remote answered with a non-success status. `message` carries the
    /// remote error envelope's message when one was parseable, else the raw
    /// response body.
    #[error("remote request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The paginated sequence failed earlier and never restarts.
    #[error("paginated sequence previously failed")]
    SequenceFailed,
}

impl SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::RequestFailed { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }
}

/// Retry policy for remote requests, owned by the client rather than by any
/// one caller.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// A typed request for the first page of a collection.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl PageRequest {
    /// The root-node feed of a collection, bounded by a crawl window.
    #[must_use]
    pub fn feed(collection_id: &str, schema: FieldSchema, window: &CrawlWindow) -> Self {
        let mut params = vec![("fields".to_string(), schema.feed_fields().join(","))];
        if let Some(since) = window.since {
            params.push(("since".to_string(), since.timestamp().to_string()));
        }
        if let Some(until) = window.until {
            params.push(("until".to_string(), until.timestamp().to_string()));
        }
        Self {
            path: format!("{collection_id}/feed"),
            params,
        }
    }

    /// The children (comments or replies) of a node.
    #[must_use]
    pub fn comments(node_id: &str, schema: FieldSchema) -> Self {
        Self {
            path: format!("{node_id}/comments"),
            params: vec![("fields".to_string(), schema.comment_fields().join(","))],
        }
    }

    /// Search for collections by name, yielding `{id, name}` hits.
    #[must_use]
    pub fn search(query: &str, kind: &str) -> Self {
        Self {
            path: "search".to_string(),
            params: vec![
                ("q".to_string(), query.to_string()),
                ("type".to_string(), kind.to_string()),
                ("fields".to_string(), "id,name".to_string()),
            ],
        }
    }
}

/// The source API boundary.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Fetch the first page for a typed request.
    async fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, SourceError>;

    /// Follow a continuation URL handed back by a previous page.
    async fn fetch_next(&self, url: &str) -> Result<RawPage, SourceError>;

    /// Fetch a single object by id.
    async fn fetch_object(&self, id: &str, fields: &[&str]) -> Result<Value, SourceError>;
}

/// HTTP implementation of the source API.
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    access_token: String,
    retry: RetryPolicy,
}

impl HttpSource {
    /// Build a client for a source endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_version: &str,
        access_token: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            access_token: access_token.to_string(),
            retry,
        })
    }

    fn request_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, path)
    }

    async fn get_with_retry(
        &self,
        url: &str,
        params: Option<&[(String, String)]>,
    ) -> Result<String, SourceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(url, params).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.retry.max_attempts && e.is_retryable() => {
                    warn!(attempt, error = %e, "Retrying source request");
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(
        &self,
        url: &str,
        params: Option<&[(String, String)]>,
    ) -> Result<String, SourceError> {
        let mut request = self.client.get(url);
        if let Some(params) = params {
            request = request
                .query(params)
                .query(&[("access_token", self.access_token.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SourceError::RequestFailed {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SourceApi for HttpSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, SourceError> {
        let url = self.request_url(&request.path);
        let body = self.get_with_retry(&url, Some(&request.params)).await?;
        RawPage::from_body(&body)
    }

    async fn fetch_next(&self, url: &str) -> Result<RawPage, SourceError> {
        // Continuation URLs already carry their full query string.
        let body = self.get_with_retry(url, None).await?;
        RawPage::from_body(&body)
    }

    async fn fetch_object(&self, id: &str, fields: &[&str]) -> Result<Value, SourceError> {
        let url = self.request_url(id);
        let params = vec![("fields".to_string(), fields.join(","))];
        let body = self.get_with_retry(&url, Some(&params)).await?;
        serde_json::from_str(&body).map_err(|e| SourceError::MalformedItem(e.to_string()))
    }
}

/// Pull the remote-reported message out of an error envelope, falling back
/// to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn error_message_prefers_the_remote_envelope() {
        assert_eq!(
            extract_error_message(r#"{"error": {"message": "rate limited"}}"#),
            "rate limited"
        );
        assert_eq!(extract_error_message("<html>gateway</html>"), "<html>gateway</html>");
        assert_eq!(extract_error_message(r#"{"error": "flat"}"#), r#"{"error": "flat"}"#);
    }

    #[test]
    fn feed_request_carries_window_bounds_as_unix_seconds() {
        let since = Utc.with_ymd_and_hms(2014, 4, 30, 0, 0, 0).unwrap();
        let window = CrawlWindow {
            since: Some(since),
            until: None,
        };
        let request = PageRequest::feed("g1", FieldSchema::Full, &window);

        assert_eq!(request.path, "g1/feed");
        assert!(request
            .params
            .contains(&("since".to_string(), since.timestamp().to_string())));
        assert!(!request.params.iter().any(|(k, _)| k == "until"));
        let fields = &request.params[0].1;
        assert!(fields.contains("attachments"));
    }

    #[test]
    fn reduced_schema_omits_the_full_only_fields() {
        let request = PageRequest::feed("g1", FieldSchema::Reduced, &CrawlWindow::default());
        let fields = &request.params[0].1;
        assert!(!fields.contains("attachments"));
        assert!(!fields.contains("link"));
    }

    #[test]
    fn only_transport_and_server_errors_retry() {
        assert!(SourceError::RequestFailed {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!SourceError::RequestFailed {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!SourceError::MalformedPage(String::new()).is_retryable());
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }
}
