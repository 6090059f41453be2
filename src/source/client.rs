//! Trace service client

use std::time::Duration;

use async_trait::async_trait;

use super::model::{ListTracesQuery, ListTracesResponse};

/// Header carrying a pre-issued identity token
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// A paginated, time-windowed source of trace records
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Identity of the queried endpoint, used as the envelope source
    fn endpoint(&self) -> &str;

    /// List one page of traces of `tracker`
    async fn list(
        &self,
        tracker: &str,
        query: &ListTracesQuery,
    ) -> Result<ListTracesResponse, SourceError>;
}

/// Client for the trace service REST API
#[derive(Debug, Clone)]
pub struct HttpTraceSource {
    http_client: reqwest::Client,
    /// `{base}/v2.0/{project_id}/`
    endpoint: reqwest::Url,
    auth_token: Option<String>,
}

impl HttpTraceSource {
    pub fn new(
        base_url: &str,
        project_id: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))?;

        let endpoint = format!("{}/v2.0/{}/", base_url.trim_end_matches('/'), project_id);
        let endpoint =
            reqwest::Url::parse(&endpoint).map_err(|e| SourceError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint,
            auth_token,
        })
    }

    fn traces_url(&self, tracker: &str) -> Result<reqwest::Url, SourceError> {
        self.endpoint
            .join(&format!("{}/trace", tracker))
            .map_err(|e| SourceError::Client(e.to_string()))
    }
}

#[async_trait]
impl TraceSource for HttpTraceSource {
    fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn list(
        &self,
        tracker: &str,
        query: &ListTracesQuery,
    ) -> Result<ListTracesResponse, SourceError> {
        let mut request = self.http_client.get(self.traces_url(tracker)?).query(query);
        if let Some(token) = &self.auth_token {
            request = request.header(AUTH_TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Client error: {0}")]
    Client(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Trace service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}
