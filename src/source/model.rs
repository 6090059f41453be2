//! Trace service wire model

use serde::{Deserialize, Serialize};

/// One audit-trail entry as returned by the trace service.
///
/// Fields the exporter derives envelope attributes from are typed; the rest
/// of the provider payload (request/response bodies, user, source ip, ...) is
/// kept verbatim in `details` so it survives into the envelope data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub trace_type: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub trace_name: String,
    #[serde(default)]
    pub trace_status: String,
    /// HTTP-ish status of the audited operation, 0 when absent or unparsable
    #[serde(default, with = "lenient_number")]
    pub code: i64,
    /// Event time in milliseconds since epoch, 0 when absent or unparsable
    #[serde(default, with = "lenient_number")]
    pub time: i64,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl TraceRecord {
    /// Minimal record, mostly useful for tests and fixtures
    pub fn new(trace_id: impl Into<String>, time: i64) -> Self {
        Self {
            trace_id: trace_id.into(),
            service_type: String::new(),
            trace_type: String::new(),
            resource_type: String::new(),
            resource_id: String::new(),
            resource_name: None,
            trace_name: String::new(),
            trace_status: String::new(),
            code: 0,
            time,
            details: serde_json::Map::new(),
        }
    }
}

/// Response body of the list-traces call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTracesResponse {
    #[serde(default, deserialize_with = "decode_traces")]
    pub traces: Vec<TraceRecord>,
    #[serde(default)]
    pub meta_data: MetaData,
}

/// Pagination metadata of one page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaData {
    /// Number of matching traces; `<= 0` means nothing in the window
    #[serde(default)]
    pub count: i64,
    /// Continuation marker; empty on the last page
    #[serde(default)]
    pub marker: Option<String>,
}

/// Query parameters of the list-traces call.
///
/// The service takes every value as a string, bounds in epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListTracesQuery {
    pub from: String,
    pub to: String,
    pub limit: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub next: String,
}

/// Decode each trace on its own so one undecodable record does not cost
/// the rest of the page
fn decode_traces<'de, D>(deserializer: D) -> Result<Vec<TraceRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();

    Ok(raw
        .into_iter()
        .filter_map(|value| {
            let trace_id = value.get("trace_id").cloned();
            match serde_json::from_value::<TraceRecord>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(?trace_id, error = %e, "Dropping undecodable trace");
                    None
                }
            }
        })
        .collect())
}

/// The service reports numbers as strings ("200"), older payloads as
/// numbers. Anything that is neither maps to 0.
mod lenient_number {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or_default(),
            Value::String(s) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        };
        Ok(value)
    }
}
