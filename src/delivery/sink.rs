//! Event sinks

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::events::{EventEnvelope, SPEC_VERSION};

/// Characters a binary-mode header value carries percent-encoded: anything
/// outside printable ASCII, plus space, `"` and `%`. Non-ASCII is always
/// encoded as its UTF-8 bytes.
const HEADER_VALUE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'%');

/// Encode an attribute value for a `ce-` header
pub fn encode_header_value(value: &str) -> String {
    utf8_percent_encode(value, HEADER_VALUE).to_string()
}

/// Destination of exported envelopes
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Target the sink delivers to, for logging
    fn target(&self) -> &str;

    /// Deliver one envelope; `Ok` only when the sink acknowledged it
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), SinkError>;
}

/// Sink posting each envelope to an HTTP endpoint in CloudEvents binary
/// content mode: attributes and extensions as `ce-` headers, data as body.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    target: reqwest::Url,
}

impl HttpSink {
    pub fn new(target: reqwest::Url, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        Ok(Self { client, target })
    }
}

#[async_trait]
impl EventSink for HttpSink {
    fn target(&self) -> &str {
        self.target.as_str()
    }

    async fn send(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        let body = envelope
            .data_bytes()
            .map_err(|e| SinkError::Encode(e.to_string()))?;

        let mut request = self
            .client
            .post(self.target.clone())
            .header("ce-specversion", SPEC_VERSION)
            .header("ce-id", encode_header_value(&envelope.id))
            .header("ce-source", encode_header_value(&envelope.source))
            .header("ce-type", encode_header_value(&envelope.event_type))
            .header("ce-subject", encode_header_value(&envelope.subject))
            .header("ce-time", envelope.time.to_rfc3339())
            .header(reqwest::header::CONTENT_TYPE, &envelope.data_content_type);

        for (name, value) in &envelope.extensions {
            request = request.header(
                format!("ce-{}", name),
                encode_header_value(&value.to_string()),
            );
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_builder() {
                SinkError::Encode(e.to_string())
            } else {
                SinkError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(SinkError::Rejected {
                status: response.status().as_u16(),
            });
        }

        tracing::trace!(event_id = %envelope.id, target = %self.target, "Event delivered");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unreachable: {0}")]
    Transport(String),

    #[error("Sink rejected event with status {status}")]
    Rejected { status: u16 },

    #[error("Event encoding failed: {0}")]
    Encode(String),
}
