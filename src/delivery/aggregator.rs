//! Batch delivery with per-envelope failure collection

use std::fmt;
use std::sync::Arc;

use super::sink::{EventSink, SinkError};
use crate::events::EventEnvelope;

/// One envelope the sink did not acknowledge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub event_id: String,
    pub cause: SinkError,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sending event {} failed: {}", self.event_id, self.cause)
    }
}

/// Outcome of delivering a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryResult {
    pub sent: usize,
    /// In submission order
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryResult {
    pub fn total(&self) -> usize {
        self.sent + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Sent count, or the aggregated error when anything failed
    pub fn into_result(self) -> Result<usize, DeliveryError> {
        if self.failures.is_empty() {
            Ok(self.sent)
        } else {
            Err(DeliveryError {
                sent: self.sent,
                failures: self.failures,
            })
        }
    }
}

/// Aggregated delivery failure of a batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} of {} events failed delivery", .failures.len(), .sent + .failures.len())]
pub struct DeliveryError {
    pub sent: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryError {
    pub fn failures(&self) -> &[DeliveryFailure] {
        &self.failures
    }
}

/// Sends batches of envelopes one by one, never stopping at a failure
#[derive(Clone)]
pub struct DeliveryAggregator {
    sink: Arc<dyn EventSink>,
}

impl DeliveryAggregator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn target(&self) -> &str {
        self.sink.target()
    }

    /// Deliver a single envelope, mapping a failure to its envelope id
    pub async fn deliver_one(&self, envelope: &EventEnvelope) -> Result<(), DeliveryFailure> {
        self.sink
            .send(envelope)
            .await
            .map_err(|cause| DeliveryFailure {
                event_id: envelope.id.clone(),
                cause,
            })
    }

    pub async fn deliver(&self, envelopes: &[EventEnvelope]) -> DeliveryResult {
        let mut result = DeliveryResult::default();

        for envelope in envelopes {
            match self.deliver_one(envelope).await {
                Ok(()) => result.sent += 1,
                Err(failure) => {
                    tracing::debug!(
                        event_id = %failure.event_id,
                        error = %failure.cause,
                        "Event delivery failed"
                    );
                    result.failures.push(failure);
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{envelope, RecordingSink};

    fn batch(n: usize) -> Vec<EventEnvelope> {
        (1..=n).map(|i| envelope(&format!("e-{}", i))).collect()
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_going() {
        let sink = Arc::new(RecordingSink::failing_on([2, 4]));
        let aggregator = DeliveryAggregator::new(sink.clone());

        let result = aggregator.deliver(&batch(5)).await;
        assert_eq!(result.sent, 3);
        assert_eq!(result.total(), 5);
        assert_eq!(sink.delivered(), vec!["e-1", "e-3", "e-5"]);

        let err = result.into_result().unwrap_err();
        let failed: Vec<&str> = err.failures().iter().map(|f| f.event_id.as_str()).collect();
        assert_eq!(failed, vec!["e-2", "e-4"]);
        assert!(err
            .failures()
            .iter()
            .all(|f| matches!(f.cause, SinkError::Rejected { status: 500 })));
        assert_eq!(err.to_string(), "2 of 5 events failed delivery");
    }

    #[tokio::test]
    async fn test_clean_batch_has_no_error() {
        let aggregator = DeliveryAggregator::new(Arc::new(RecordingSink::new()));

        let result = aggregator.deliver(&batch(3)).await;
        assert!(result.is_complete());
        assert_eq!(result.into_result().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let sink = Arc::new(RecordingSink::new());
        let aggregator = DeliveryAggregator::new(sink.clone());

        let result = aggregator.deliver(&[]).await;
        assert_eq!(result, DeliveryResult::default());
        assert_eq!(sink.attempts(), 0);
    }
}
