//! Trace record to event envelope mapping

use chrono::{DateTime, Utc};

use super::envelope::{EventEnvelope, ExtensionValue, Extensions, APPLICATION_JSON};
use crate::source::TraceRecord;

/// Event type used when a record carries none of the type fields
pub const FALLBACK_EVENT_TYPE: &str = "unknown";

/// Account the querier runs against; stable for the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountIdentity {
    pub region: String,
    pub domain: String,
    pub tenant: String,
}

/// Maps trace records to envelopes.
///
/// Deterministic apart from the fixed source/identity and the configured
/// extension overrides, which are applied last and may shadow computed
/// extensions.
#[derive(Debug, Clone)]
pub struct EventTransformer {
    source: String,
    identity: AccountIdentity,
    overrides: Extensions,
}

impl EventTransformer {
    pub fn new(source: impl Into<String>, identity: AccountIdentity, overrides: Extensions) -> Self {
        Self {
            source: source.into(),
            identity,
            overrides,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn transform(&self, record: TraceRecord) -> Result<EventEnvelope, TransformError> {
        let data =
            serde_json::to_value(&record).map_err(|e| TransformError::MalformedRecord {
                trace_id: record.trace_id.clone(),
                reason: e.to_string(),
            })?;

        let mut extensions = Extensions::new();
        extensions.insert("status".to_string(), record.trace_status.clone().into());
        extensions.insert("code".to_string(), ExtensionValue::Integer(record.code));
        extensions.insert("resourceid".to_string(), record.resource_id.clone().into());
        extensions.insert("region".to_string(), self.identity.region.clone().into());
        extensions.insert("domain".to_string(), self.identity.domain.clone().into());
        extensions.insert("tenant".to_string(), self.identity.tenant.clone().into());
        for (name, value) in &self.overrides {
            extensions.insert(name.clone(), value.clone());
        }

        Ok(EventEnvelope {
            event_type: event_type(&record),
            subject: subject(&record),
            time: DateTime::from_timestamp_millis(record.time).unwrap_or_default(),
            source: self.source.clone(),
            data_content_type: APPLICATION_JSON.to_string(),
            data,
            extensions,
            id: record.trace_id,
        })
    }
}

/// `service.trace.resource.name`, lowercased, trailing dots trimmed
pub fn event_type(record: &TraceRecord) -> String {
    let joined = format!(
        "{}.{}.{}.{}",
        record.service_type, record.trace_type, record.resource_type, record.trace_name
    )
    .to_lowercase();

    let trimmed = joined.trim_end_matches('.');
    if trimmed.is_empty() {
        FALLBACK_EVENT_TYPE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resource name when present, else resource id, else the trace id
pub fn subject(record: &TraceRecord) -> String {
    match record.resource_name.as_deref() {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ if !record.resource_id.trim().is_empty() => record.resource_id.clone(),
        _ => record.trace_id.clone(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Trace {trace_id} could not be serialized: {reason}")]
    MalformedRecord { trace_id: String, reason: String },
}
