//! JSON-over-HTTP label service client.
//!
//! Sends `{container, key, max_labels}` and expects
//! `{"labels": [{"name": ..., "confidence": ...}]}` back. Confidence may be
//! reported either as 0.0-1.0 or as a 0-100 percentage.

use super::provider::LabelDetector;
use crate::error::PipelineError;
use crate::event::SourceLocation;
use crate::types::LabelResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Label service reached over HTTP.
pub struct HttpLabelDetector {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpLabelDetector {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

// --- Request types ---

#[derive(Serialize)]
struct DetectRequest<'a> {
    container: &'a str,
    key: &'a str,
    max_labels: usize,
}

// --- Response types ---

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    labels: Vec<WireLabel>,
}

#[derive(Deserialize)]
struct WireLabel {
    #[serde(alias = "label", alias = "Name")]
    name: String,
    #[serde(alias = "score", alias = "Confidence")]
    confidence: f32,
}

fn into_labels(response: DetectResponse) -> Vec<LabelResult> {
    response
        .labels
        .into_iter()
        .filter(|l| !l.name.trim().is_empty() && l.confidence.is_finite())
        .map(|l| {
            let confidence = if l.confidence > 1.0 {
                l.confidence / 100.0
            } else {
                l.confidence
            };
            LabelResult::new(l.name.trim(), confidence.clamp(0.0, 1.0))
        })
        .collect()
}

/// Connection and timeout failures are worth another attempt; anything else
/// (bad URL, request body, redirect loop) is not.
fn classify_send_error(error: reqwest::Error) -> PipelineError {
    let mut message = format!("label request failed: {error}");
    let mut cause = std::error::Error::source(&error);
    while let Some(inner) = cause {
        message.push_str(&format!(": {inner}"));
        cause = inner.source();
    }

    if error.is_connect() || error.is_timeout() {
        PipelineError::LabelServiceUnreachable { message }
    } else {
        PipelineError::Labeling {
            message,
            status_code: None,
        }
    }
}

#[async_trait]
impl LabelDetector for HttpLabelDetector {
    fn name(&self) -> &str {
        "http"
    }

    async fn detect_labels(
        &self,
        source: &SourceLocation,
        max_labels: usize,
    ) -> Result<Vec<LabelResult>, PipelineError> {
        let body = DetectRequest {
            container: &source.container,
            key: &source.key,
            max_labels,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(classify_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Labeling {
                message: format!("label service HTTP {status}: {text}"),
                status_code: Some(status.as_u16()),
            });
        }

        let parsed: DetectResponse = resp.json().await.map_err(|e| PipelineError::Labeling {
            message: format!("failed to parse label response: {e}"),
            status_code: None,
        })?;

        Ok(into_labels(parsed))
    }
}
