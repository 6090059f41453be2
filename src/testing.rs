//! Scripted source and recording sink shared by the unit tests

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use crate::delivery::{EventSink, SinkError};
use crate::events::{EventEnvelope, Extensions, APPLICATION_JSON};
use crate::source::{ListTracesQuery, ListTracesResponse, MetaData, SourceError, TraceRecord, TraceSource};

pub fn record(id: &str) -> TraceRecord {
    let mut record = TraceRecord::new(id, 1_700_000_000_000);
    record.service_type = "ECS".to_string();
    record.trace_type = "ConsoleAction".to_string();
    record.resource_type = "instance".to_string();
    record.trace_name = "startInstance".to_string();
    record.resource_id = format!("res-{}", id);
    record.trace_status = "normal".to_string();
    record.code = 200;
    record
}

pub fn envelope(id: &str) -> EventEnvelope {
    EventEnvelope {
        id: id.to_string(),
        source: "test".to_string(),
        event_type: "ecs.consoleaction.instance.startinstance".to_string(),
        subject: format!("res-{}", id),
        time: chrono::Utc::now(),
        data_content_type: APPLICATION_JSON.to_string(),
        data: serde_json::json!({ "trace_id": id }),
        extensions: Extensions::new(),
    }
}

enum Script {
    /// Page `k` answers cursor `page-k` (the first page answers the empty
    /// cursor) and points at `page-{k+1}`, the last one at nothing.
    Pages(Vec<Vec<TraceRecord>>),
    /// Every call returns the same page and the same marker
    Looping(Vec<TraceRecord>),
}

/// Trace source replaying fixed pages for any window
pub struct ScriptedSource {
    script: Script,
    fail_from: Option<usize>,
    queries: Mutex<Vec<(String, ListTracesQuery)>>,
}

impl ScriptedSource {
    pub fn new(pages: Vec<Vec<TraceRecord>>) -> Self {
        Self {
            script: Script::Pages(pages),
            fail_from: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn looping(records: Vec<TraceRecord>) -> Self {
        Self {
            script: Script::Looping(records),
            fail_from: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::new(Vec::new()).failing_from(0)
    }

    /// Fail every request for page index `page` and later
    pub fn failing_from(mut self, page: usize) -> Self {
        self.fail_from = Some(page);
        self
    }

    pub fn queries(&self) -> Vec<ListTracesQuery> {
        self.queries.lock().iter().map(|(_, q)| q.clone()).collect()
    }

    pub fn trackers(&self) -> Vec<String> {
        self.queries.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    fn page_index(cursor: &str) -> Option<usize> {
        if cursor.is_empty() {
            Some(0)
        } else {
            cursor.strip_prefix("page-")?.parse().ok()
        }
    }
}

#[async_trait]
impl TraceSource for ScriptedSource {
    fn endpoint(&self) -> &str {
        "https://cts.test/v2.0/proj-1/"
    }

    async fn list(
        &self,
        tracker: &str,
        query: &ListTracesQuery,
    ) -> Result<ListTracesResponse, SourceError> {
        let call = {
            let mut queries = self.queries.lock();
            queries.push((tracker.to_string(), query.clone()));
            queries.len() - 1
        };

        let index = match &self.script {
            Script::Looping(_) => call,
            Script::Pages(_) => Self::page_index(&query.next).ok_or_else(|| SourceError::Status {
                status: 400,
                body: format!("unknown marker {}", query.next),
            })?,
        };
        if self.fail_from.map_or(false, |from| index >= from) {
            return Err(SourceError::Network("connection reset".to_string()));
        }

        match &self.script {
            Script::Looping(records) => Ok(ListTracesResponse {
                traces: records.clone(),
                meta_data: MetaData {
                    count: records.len() as i64,
                    marker: Some("loop".to_string()),
                },
            }),
            Script::Pages(pages) => {
                let total: usize = pages.iter().map(Vec::len).sum();
                let traces = pages.get(index).cloned().unwrap_or_default();
                let marker = if index + 1 < pages.len() {
                    format!("page-{}", index + 1)
                } else {
                    String::new()
                };
                Ok(ListTracesResponse {
                    traces,
                    meta_data: MetaData {
                        count: total as i64,
                        marker: Some(marker),
                    },
                })
            }
        }
    }
}

/// Sink remembering what it acknowledged
pub struct RecordingSink {
    delivered: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// 1-based attempt numbers to reject
    fail_on: HashSet<usize>,
    delay: Option<Duration>,
    cancel_at: Option<(usize, CancellationToken)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail_on: HashSet::new(),
            delay: None,
            cancel_at: None,
        }
    }

    pub fn failing_on(attempts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_on: attempts.into_iter().collect(),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancel `token` while attempt `attempt` is in flight
    pub fn cancelling_at(mut self, attempt: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((attempt, token));
        self
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Sends currently between entry and return
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of sends ever in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn attempt(&self, attempt: usize, envelope: &EventEnvelope) -> Result<(), SinkError> {
        if let Some((at, token)) = &self.cancel_at {
            if *at == attempt {
                token.cancel();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.contains(&attempt) {
            return Err(SinkError::Rejected { status: 500 });
        }

        self.delivered.lock().push(envelope.id.clone());
        Ok(())
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn target(&self) -> &str {
        "memory://recording"
    }

    async fn send(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let result = self.attempt(attempt, envelope).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Formatted log output of the current thread, for asserting on log fields
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's events into a fresh capture until the guard drops.
    /// Tasks spawned on a current-thread runtime log into it too.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
