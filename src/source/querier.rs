//! Paginated trace querier
//!
//! Walks the list-traces pages of one time window by following the
//! continuation marker until the service reports the last page.

use std::sync::Arc;

use super::client::{SourceError, TraceSource};
use super::model::{ListTracesQuery, TraceRecord};
use crate::schedule::TimeWindow;

/// Tracker queried when none is configured
pub const DEFAULT_TRACKER_NAME: &str = "system";

/// Page size bounds accepted by the trace service
pub const MIN_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Opaque continuation token; empty means "first page" going in and
/// "last page" coming back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of traces
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<TraceRecord>,
    pub next: PageCursor,
    /// Count reported by the service for the query
    pub total_count_hint: i64,
}

/// Result of collecting a whole window
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// The service had nothing in the window; not an error
    Empty,
    /// All records of the window, in page order
    Records(Vec<TraceRecord>),
}

impl QueryOutcome {
    pub fn len(&self) -> usize {
        match self {
            QueryOutcome::Empty => 0,
            QueryOutcome::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_records(self) -> Vec<TraceRecord> {
        match self {
            QueryOutcome::Empty => Vec::new(),
            QueryOutcome::Records(records) => records,
        }
    }
}

/// Queries one tracker of the trace service
pub struct TraceQuerier {
    source: Arc<dyn TraceSource>,
    tracker: String,
    page_size: u32,
}

impl TraceQuerier {
    /// Create a querier; a blank tracker falls back to [`DEFAULT_TRACKER_NAME`]
    /// and the page size is clamped into the service limits.
    pub fn new(source: Arc<dyn TraceSource>, tracker: &str, page_size: u32) -> Self {
        let tracker = if tracker.trim().is_empty() {
            DEFAULT_TRACKER_NAME.to_string()
        } else {
            tracker.trim().to_string()
        };

        Self {
            source,
            tracker,
            page_size: page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
        }
    }

    pub fn tracker(&self) -> &str {
        &self.tracker
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Identity of the queried endpoint
    pub fn endpoint(&self) -> &str {
        self.source.endpoint()
    }

    /// Fetch a single page of `window` starting at `cursor`
    pub async fn fetch_page(
        &self,
        window: &TimeWindow,
        cursor: &PageCursor,
        page_size: u32,
    ) -> Result<Page, QueryError> {
        let query = ListTracesQuery {
            from: window.from_millis().to_string(),
            to: window.to_millis().to_string(),
            limit: page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE).to_string(),
            next: cursor.as_str().to_string(),
        };

        let response = self.source.list(&self.tracker, &query).await?;

        Ok(Page {
            records: response.traces,
            next: PageCursor::new(response.meta_data.marker.unwrap_or_default()),
            total_count_hint: response.meta_data.count,
        })
    }

    /// Page-by-page walk over `window`
    pub fn pages(&self, window: TimeWindow) -> Pages<'_> {
        Pages {
            querier: self,
            window,
            cursor: PageCursor::default(),
            exhausted: false,
            pages_read: 0,
        }
    }

    /// Collect every record of `window`, following the marker to the end
    pub async fn collect(&self, window: TimeWindow) -> Result<QueryOutcome, QueryError> {
        let mut pages = self.pages(window);
        let mut records = Vec::new();

        while let Some(page) = pages.next_page().await? {
            records.extend(page.records);
        }

        tracing::debug!(
            tracker = %self.tracker,
            pages = pages.pages_read(),
            records = records.len(),
            "Collected trace window"
        );

        if records.is_empty() {
            Ok(QueryOutcome::Empty)
        } else {
            Ok(QueryOutcome::Records(records))
        }
    }
}

/// Cursor-driven iterator over the pages of one window.
///
/// The cursor starts empty, is replaced after every page and dropped with
/// the iterator at the end of the cycle.
pub struct Pages<'a> {
    querier: &'a TraceQuerier,
    window: TimeWindow,
    cursor: PageCursor,
    exhausted: bool,
    pages_read: usize,
}

impl Pages<'_> {
    /// Fetch the next page, `None` once the last page has been returned
    pub async fn next_page(&mut self) -> Result<Option<Page>, QueryError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = match self
            .querier
            .fetch_page(&self.window, &self.cursor, self.querier.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };
        self.pages_read += 1;

        if page.total_count_hint <= 0 || page.next.is_empty() {
            self.exhausted = true;
        } else if page.next == self.cursor {
            tracing::warn!(
                tracker = %self.querier.tracker,
                marker = %page.next.as_str(),
                "Trace service repeated its page marker, stopping pagination"
            );
            self.exhausted = true;
        } else {
            self.cursor = page.next.clone();
        }

        Ok(Some(page))
    }

    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Trace service unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
}
