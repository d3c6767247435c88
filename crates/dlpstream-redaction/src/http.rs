//! HTTP client for a remote redaction service
//!
//! Request: `POST {endpoint}/v1/redact` with
//! `{"items": [...], "detectors": [...], "min_likelihood": "...", "replace_with": "REDACTED"}`.
//! Response: `{"items": [...]}` with one redacted string per input item.

use crate::client::RedactionClient;
use async_trait::async_trait;
use dlpstream_core::{ClassifierFailure, DetectorSet, Error, Result, REDACTION_MARKER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for [`HttpRedactionClient`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRedactionConfig {
    /// Base URL of the service
    pub endpoint: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Optional bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl HttpRedactionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_ms: default_timeout_ms(),
            api_key: None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Serialize)]
struct RedactRequest<'a> {
    items: &'a [String],
    detectors: &'a [String],
    min_likelihood: &'static str,
    replace_with: &'static str,
}

#[derive(Deserialize)]
struct RedactResponse {
    items: Vec<String>,
}

/// Redaction client backed by a remote HTTP/JSON service
pub struct HttpRedactionClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpRedactionClient {
    /// Build a client from its configuration
    pub fn new(config: &HttpRedactionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/v1/redact", config.endpoint.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl RedactionClient for HttpRedactionClient {
    async fn redact_batch(
        &self,
        texts: &[String],
        detectors: &DetectorSet,
    ) -> Result<Vec<String>> {
        if detectors.is_empty() {
            return Err(Error::invalid_input("empty detector set"));
        }

        let body = RedactRequest {
            items: texts,
            detectors: detectors.detectors(),
            min_likelihood: detectors.min_likelihood().as_str(),
            replace_with: REDACTION_MARKER,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!(status = %status, items = texts.len(), "redaction service responded");

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, detail));
        }

        let parsed: RedactResponse = response
            .json()
            .await
            .map_err(|e| Error::classifier_transient(ClassifierFailure::Unavailable, e.to_string()))?;

        if parsed.items.len() != texts.len() {
            return Err(Error::invalid_input(format!(
                "service returned {} items for {} inputs",
                parsed.items.len(),
                texts.len()
            )));
        }
        Ok(parsed.items)
    }

    fn name(&self) -> &str {
        "http_redaction"
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        ClassifierFailure::Timeout
    } else {
        ClassifierFailure::Unavailable
    };
    Error::classifier_transient(kind, err.to_string())
}

/// Map a non-success status to the error taxonomy
fn status_error(status: StatusCode, detail: String) -> Error {
    let message = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, detail)
    };
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::PAYLOAD_TOO_LARGE => {
            Error::invalid_input(message)
        }
        StatusCode::TOO_MANY_REQUESTS => {
            Error::classifier_transient(ClassifierFailure::QuotaExceeded, message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Error::classifier_transient(ClassifierFailure::Timeout, message)
        }
        _ => Error::classifier_transient(ClassifierFailure::Unavailable, message),
    }
}
