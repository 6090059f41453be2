//! Streaming export pipeline
//!
//! The producer walks the window page by page, transforms each record and
//! hands envelopes one at a time to the consumer, which delivers them to the
//! sink. The handoff channel holds a single envelope, so a slow sink stalls
//! the trace query instead of buffering the whole window in memory.
//!
//! ```text
//! pages ──> transform ──[cap 1]──> deliver
//!    └──── completion (oneshot) ────┘
//! ```
//!
//! The producer owns and closes the envelope channel; the consumer only
//! receives. Either side stops pulling work once the shared done token is
//! cancelled, but a send already in flight is allowed to finish.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::aggregator::{DeliveryAggregator, DeliveryResult};
use crate::events::{EventEnvelope, EventTransformer};
use crate::schedule::TimeWindow;
use crate::source::TraceQuerier;

/// What the producer side did for one window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub pages: usize,
    /// Envelopes handed to the consumer
    pub produced: usize,
    /// Records dropped because they could not be transformed
    pub skipped: usize,
    /// Set when the trace service failed mid-walk
    pub error: Option<String>,
    pub cancelled: bool,
}

impl ProducerReport {
    /// The service had nothing in the window
    pub fn is_empty_window(&self) -> bool {
        self.error.is_none() && self.produced == 0 && self.skipped == 0
    }
}

/// Outcome of one streamed window
#[derive(Debug, Clone, Default)]
pub struct StreamReport {
    pub producer: ProducerReport,
    /// Envelopes taken off the channel by the consumer
    pub received: usize,
    pub delivery: DeliveryResult,
    /// The consumer stopped on the done signal
    pub cancelled: bool,
}

impl StreamReport {
    /// Every produced envelope reached the consumer
    pub fn is_drained(&self) -> bool {
        self.producer.produced == self.received
    }
}

/// Concurrent query/transform and delivery of one window
#[derive(Clone)]
pub struct StreamingPipeline {
    querier: Arc<TraceQuerier>,
    transformer: Arc<EventTransformer>,
    delivery: DeliveryAggregator,
    /// Deliver to the sink; otherwise envelopes are only logged
    forward: bool,
}

impl StreamingPipeline {
    pub fn new(
        querier: Arc<TraceQuerier>,
        transformer: Arc<EventTransformer>,
        delivery: DeliveryAggregator,
        forward: bool,
    ) -> Self {
        Self {
            querier,
            transformer,
            delivery,
            forward,
        }
    }

    /// Stream `window` to the sink, returning once both sides have exited
    pub async fn run(&self, window: TimeWindow, done: CancellationToken) -> StreamReport {
        let (events_tx, events_rx) = mpsc::channel::<EventEnvelope>(1);
        let (completion_tx, completion_rx) = oneshot::channel::<ProducerReport>();

        let producer = tokio::spawn(produce(
            Arc::clone(&self.querier),
            Arc::clone(&self.transformer),
            window,
            events_tx,
            completion_tx,
            done.clone(),
        ));
        let consumer = tokio::spawn(consume(
            self.delivery.clone(),
            self.forward,
            self.querier.tracker().to_string(),
            window,
            events_rx,
            completion_rx,
            done,
        ));

        if let Err(e) = producer.await {
            tracing::error!(error = %e, "Stream producer task failed");
        }
        match consumer.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Stream consumer task failed");
                StreamReport::default()
            }
        }
    }
}

async fn produce(
    querier: Arc<TraceQuerier>,
    transformer: Arc<EventTransformer>,
    window: TimeWindow,
    events_tx: mpsc::Sender<EventEnvelope>,
    completion_tx: oneshot::Sender<ProducerReport>,
    done: CancellationToken,
) {
    let mut report = ProducerReport::default();
    let mut pages = querier.pages(window);

    'pages: loop {
        let next = tokio::select! {
            biased;
            _ = done.cancelled() => {
                report.cancelled = true;
                break;
            }
            next = pages.next_page() => next,
        };

        let page = match next {
            Ok(Some(page)) => page,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(
                    tracker = %querier.tracker(),
                    from = %window.from,
                    to = %window.to,
                    error = %e,
                    "Querying trace service failed"
                );
                report.error = Some(e.to_string());
                break;
            }
        };
        report.pages += 1;

        for record in page.records {
            let envelope = match transformer.transform(record) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(
                        tracker = %querier.tracker(),
                        from = %window.from,
                        to = %window.to,
                        error = %e,
                        "Transforming trace to event failed, skipping it"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = done.cancelled() => {
                    report.cancelled = true;
                    break 'pages;
                }
                sent = events_tx.send(envelope) => {
                    if sent.is_err() {
                        // consumer is gone
                        break 'pages;
                    }
                    report.produced += 1;
                }
            }
        }
    }

    if report.is_empty_window() && !report.cancelled {
        tracing::debug!(tracker = %querier.tracker(), %window, "No traces in window");
    } else {
        tracing::info!(
            tracker = %querier.tracker(),
            produced = report.produced,
            skipped = report.skipped,
            "Collected cloud events"
        );
    }

    let _ = completion_tx.send(report);
    // events_tx drops here, closing the channel for the consumer
}

async fn consume(
    delivery: DeliveryAggregator,
    forward: bool,
    tracker: String,
    window: TimeWindow,
    mut events_rx: mpsc::Receiver<EventEnvelope>,
    completion_rx: oneshot::Receiver<ProducerReport>,
    done: CancellationToken,
) -> StreamReport {
    let mut report = StreamReport::default();

    loop {
        let envelope = tokio::select! {
            biased;
            _ = done.cancelled() => {
                report.cancelled = true;
                break;
            }
            next = events_rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        report.received += 1;

        if forward {
            match delivery.deliver_one(&envelope).await {
                Ok(()) => report.delivery.sent += 1,
                Err(failure) => {
                    tracing::error!(
                        %tracker,
                        from = %window.from,
                        to = %window.to,
                        event_id = %failure.event_id,
                        error = %failure.cause,
                        "Delivering cloud event failed"
                    );
                    report.delivery.failures.push(failure);
                }
            }
        }

        tracing::debug!(
            id = %envelope.id,
            status = ?envelope.extension("status"),
            event_type = %envelope.event_type,
            source = %envelope.source,
            subject = %envelope.subject,
            "Processed event"
        );
    }
    drop(events_rx);

    report.producer = completion_rx.await.unwrap_or_default();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AccountIdentity;
    use crate::events::Extensions;
    use crate::testing::{record, LogCapture, RecordingSink, ScriptedSource};
    use chrono::Utc;
    use std::time::Duration;

    fn pipeline(
        source: ScriptedSource,
        sink: Arc<RecordingSink>,
        forward: bool,
    ) -> StreamingPipeline {
        let source = Arc::new(source);
        let querier = Arc::new(TraceQuerier::new(source, "system", 50));
        let transformer = Arc::new(EventTransformer::new(
            "src",
            AccountIdentity::default(),
            Extensions::new(),
        ));
        StreamingPipeline::new(querier, transformer, DeliveryAggregator::new(sink), forward)
    }

    fn window() -> TimeWindow {
        TimeWindow::calculate(Utc::now(), 5, Duration::ZERO)
    }

    fn pages(count: usize, per_page: usize) -> Vec<Vec<crate::source::TraceRecord>> {
        (0..count)
            .map(|p| {
                (0..per_page)
                    .map(|i| record(&format!("p{}-{}", p, i)))
                    .collect()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_stream_delivers_every_event_in_order() {
        let sink = Arc::new(RecordingSink::new().with_delay(Duration::from_millis(2)));
        let pipeline = pipeline(ScriptedSource::new(pages(3, 4)), sink.clone(), true);

        let report = pipeline.run(window(), CancellationToken::new()).await;

        assert!(report.is_drained());
        assert_eq!(report.producer.produced, 12);
        assert_eq!(report.received, 12);
        assert_eq!(report.delivery.sent, 12);
        assert_eq!(report.producer.pages, 3);
        assert!(!report.cancelled);

        let expected: Vec<String> = pages(3, 4)
            .into_iter()
            .flatten()
            .map(|r| r.trace_id)
            .collect();
        assert_eq!(sink.delivered(), expected);
    }

    #[tokio::test]
    async fn test_stream_never_drops_under_multithreaded_scheduling() {
        for _ in 0..5 {
            let sink = Arc::new(RecordingSink::new());
            let pipeline = pipeline(ScriptedSource::new(pages(5, 20)), sink.clone(), true);

            let report = tokio::spawn(async move {
                pipeline.run(window(), CancellationToken::new()).await
            })
            .await
            .unwrap();

            assert_eq!(report.producer.produced, report.received);
            assert_eq!(sink.delivered().len(), 100);
        }
    }

    #[tokio::test]
    async fn test_stream_reports_failures_without_stopping() {
        let sink = Arc::new(RecordingSink::failing_on([2, 4]));
        let pipeline = pipeline(ScriptedSource::new(pages(1, 5)), sink.clone(), true);

        let report = pipeline.run(window(), CancellationToken::new()).await;

        assert_eq!(report.received, 5);
        assert_eq!(report.delivery.sent, 3);
        let failed: Vec<&str> = report
            .delivery
            .failures
            .iter()
            .map(|f| f.event_id.as_str())
            .collect();
        assert_eq!(failed, vec!["p0-1", "p0-3"]);
    }

    #[tokio::test]
    async fn test_failed_delivery_log_names_tracker_and_window() {
        let (logs, _guard) = LogCapture::install();
        let sink = Arc::new(RecordingSink::failing_on([2]));
        let pipeline = pipeline(ScriptedSource::new(pages(1, 3)), sink, true);
        let window = window();

        pipeline.run(window, CancellationToken::new()).await;

        let lines = logs.lines_containing("Delivering cloud event failed");
        assert_eq!(lines.len(), 1, "{:?}", lines);
        assert!(lines[0].contains("tracker=system"));
        assert!(lines[0].contains(&format!("from={}", window.from)));
        assert!(lines[0].contains(&format!("to={}", window.to)));
        assert!(lines[0].contains("event_id=p0-1"));
    }

    #[tokio::test]
    async fn test_stream_without_forwarding_only_drains() {
        let sink = Arc::new(RecordingSink::new());
        let pipeline = pipeline(ScriptedSource::new(pages(2, 3)), sink.clone(), false);

        let report = pipeline.run(window(), CancellationToken::new()).await;

        assert_eq!(report.received, 6);
        assert!(report.is_drained());
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_empty_window_produces_nothing() {
        let sink = Arc::new(RecordingSink::new());
        let pipeline = pipeline(ScriptedSource::new(vec![vec![]]), sink.clone(), true);

        let report = pipeline.run(window(), CancellationToken::new()).await;

        assert!(report.producer.is_empty_window());
        assert_eq!(report.received, 0);
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_source_failure_mid_walk_keeps_earlier_events() {
        let sink = Arc::new(RecordingSink::new());
        let source = ScriptedSource::new(pages(3, 2)).failing_from(1);
        let pipeline = pipeline(source, sink.clone(), true);

        let report = pipeline.run(window(), CancellationToken::new()).await;

        assert!(report.producer.error.is_some());
        assert_eq!(report.received, 2);
        assert_eq!(sink.delivered(), vec!["p0-0", "p0-1"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let sink = Arc::new(RecordingSink::new());
        let pipeline = pipeline(ScriptedSource::new(pages(2, 2)), sink.clone(), true);
        let done = CancellationToken::new();
        done.cancel();

        let report = pipeline.run(window(), done).await;

        assert!(report.cancelled);
        assert!(report.producer.cancelled);
        assert_eq!(report.received, 0);
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_send_finish() {
        let done = CancellationToken::new();
        let sink = Arc::new(RecordingSink::new().cancelling_at(2, done.clone()));
        let pipeline = pipeline(ScriptedSource::new(pages(1, 10)), sink.clone(), true);

        let report = pipeline.run(window(), done).await;

        assert!(report.cancelled);
        assert_eq!(report.received, 2);
        assert_eq!(report.delivery.sent, 2);
        assert_eq!(sink.delivered(), vec!["p0-0", "p0-1"]);
    }
}
