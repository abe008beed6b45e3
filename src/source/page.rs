//! Lazy cursor over a paginated result collection.

use serde_json::Value;

use super::raw::RawPage;
use super::{SourceApi, SourceError};

/// Walks a paginated collection item by item, fetching the next page through
/// the source client only once the buffered page is drained.
///
/// The sequence is finite and non-restartable: exhaustion is permanent, and
/// a failed page fetch leaves the cursor permanently failed.
pub struct PageCursor<'a> {
    client: &'a dyn SourceApi,
    items: Vec<Value>,
    index: usize,
    next: Option<String>,
    failed: bool,
}

impl<'a> PageCursor<'a> {
    /// Start a cursor from an already fetched first page.
    #[must_use]
    pub fn new(client: &'a dyn SourceApi, first: RawPage) -> Self {
        Self {
            client,
            items: first.data,
            index: 0,
            next: first.paging.and_then(|p| p.next),
            failed: false,
        }
    }

    /// Yield the next raw item, fetching further pages as needed.
    ///
    /// Returns `Ok(None)` once the final page is drained. An empty page with
    /// a continuation token does not terminate the sequence; the cursor
    /// keeps walking forward.
    ///
    /// # Errors
    ///
    /// Returns the fetch or decode error that broke the sequence; every call
    /// after a failure returns [`SourceError::SequenceFailed`].
    pub async fn try_next(&mut self) -> Result<Option<Value>, SourceError> {
        if self.failed {
            return Err(SourceError::SequenceFailed);
        }

        while self.index == self.items.len() {
            let Some(url) = self.next.take() else {
                return Ok(None);
            };
            let page = match self.client.fetch_next(&url).await {
                Ok(page) => page,
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            };
            self.items = page.data;
            self.index = 0;
            self.next = page.paging.and_then(|p| p.next);
        }

        let item = self.items[self.index].take();
        self.index += 1;
        Ok(Some(item))
    }
}
