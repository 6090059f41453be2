//! Trace exporter
//!
//! Holds the querier, the transformer and the delivery side and runs one
//! window through them, either collected as a batch or streamed.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::delivery::{DeliveryAggregator, DeliveryResult, EventSink, StreamReport, StreamingPipeline};
use crate::events::{EventEnvelope, EventTransformer};
use crate::schedule::TimeWindow;
use crate::source::{QueryError, QueryOutcome, TraceQuerier};

/// Envelopes of one window
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub envelopes: Vec<EventEnvelope>,
    /// Records that could not be transformed and were left out
    pub skipped: usize,
}

impl Collected {
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty() && self.skipped == 0
    }
}

/// Outcome of one batch-mode window
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub collected: usize,
    pub skipped: usize,
    /// `None` when forwarding is off or nothing was collected
    pub delivery: Option<DeliveryResult>,
}

pub struct Exporter {
    querier: Arc<TraceQuerier>,
    transformer: Arc<EventTransformer>,
    delivery: DeliveryAggregator,
    /// Pull-and-forward: deliver collected events to the sink
    forward: bool,
}

impl Exporter {
    pub fn new(
        querier: TraceQuerier,
        transformer: EventTransformer,
        sink: Arc<dyn EventSink>,
        forward: bool,
    ) -> Self {
        Self {
            querier: Arc::new(querier),
            transformer: Arc::new(transformer),
            delivery: DeliveryAggregator::new(sink),
            forward,
        }
    }

    pub fn querier(&self) -> &TraceQuerier {
        &self.querier
    }

    pub fn sink_target(&self) -> &str {
        self.delivery.target()
    }

    pub fn forwards(&self) -> bool {
        self.forward
    }

    /// Query `window` and transform every record.
    ///
    /// Records that fail to transform are logged and skipped; the rest of
    /// the window is still exported.
    pub async fn collect(&self, window: TimeWindow) -> Result<Collected, QueryError> {
        let records = match self.querier.collect(window).await? {
            QueryOutcome::Empty => return Ok(Collected::default()),
            QueryOutcome::Records(records) => records,
        };

        let mut collected = Collected {
            envelopes: Vec::with_capacity(records.len()),
            skipped: 0,
        };
        for record in records {
            match self.transformer.transform(record) {
                Ok(envelope) => collected.envelopes.push(envelope),
                Err(e) => {
                    tracing::error!(
                        tracker = %self.querier.tracker(),
                        from = %window.from,
                        to = %window.to,
                        error = %e,
                        "Transforming trace to event failed, skipping it"
                    );
                    collected.skipped += 1;
                }
            }
        }

        Ok(collected)
    }

    /// Collect `window` and, when forwarding, deliver it as one batch
    pub async fn run_batch(&self, window: TimeWindow) -> Result<BatchReport, QueryError> {
        let collected = self.collect(window).await?;
        let tracker = self.querier.tracker();

        if collected.is_empty() {
            tracing::debug!(%tracker, %window, "No traces in window");
            return Ok(BatchReport::default());
        }

        tracing::info!(
            %tracker,
            collected = collected.envelopes.len(),
            skipped = collected.skipped,
            "Collected cloud events"
        );
        for event in &collected.envelopes {
            tracing::debug!(
                id = %event.id,
                status = ?event.extension("status"),
                event_type = %event.event_type,
                source = %event.source,
                subject = %event.subject,
                "Collected event"
            );
        }

        let mut report = BatchReport {
            collected: collected.envelopes.len(),
            skipped: collected.skipped,
            delivery: None,
        };

        if self.forward && !collected.envelopes.is_empty() {
            let result = self.delivery.deliver(&collected.envelopes).await;
            for failure in &result.failures {
                tracing::error!(
                    %tracker,
                    from = %window.from,
                    to = %window.to,
                    event_id = %failure.event_id,
                    error = %failure.cause,
                    "Delivering cloud event failed"
                );
            }
            tracing::info!(
                sink = %self.delivery.target(),
                "Delivered {}/{} cloud events",
                result.sent,
                result.total()
            );
            report.delivery = Some(result);
        }

        Ok(report)
    }

    /// Stream `window` through the producer/consumer pipeline
    pub async fn run_stream(&self, window: TimeWindow, done: CancellationToken) -> StreamReport {
        let pipeline = StreamingPipeline::new(
            Arc::clone(&self.querier),
            Arc::clone(&self.transformer),
            self.delivery.clone(),
            self.forward,
        );
        let report = pipeline.run(window, done).await;

        if self.forward && report.received > 0 {
            tracing::info!(
                sink = %self.delivery.target(),
                "Delivered {}/{} cloud events",
                report.delivery.sent,
                report.received
            );
        }

        report
    }
}
