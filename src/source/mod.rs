//! Trace service access
//!
//! The service exposes `GET /v2.0/{project}/{tracker}/trace` with `from`,
//! `to` (epoch millis), `limit` and `next` parameters and answers with a page
//! of traces plus a continuation marker:
//!
//! ```json
//! {"traces": [...], "meta_data": {"count": 42, "marker": "..."}}
//! ```

pub mod client;
pub mod model;
pub mod querier;

pub use client::{HttpTraceSource, SourceError, TraceSource};
pub use model::{ListTracesQuery, ListTracesResponse, MetaData, TraceRecord};
pub use querier::{
    Page, PageCursor, Pages, QueryError, QueryOutcome, TraceQuerier, DEFAULT_TRACKER_NAME,
    MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
