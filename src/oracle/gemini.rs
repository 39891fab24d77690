//! Gemini `generateContent` client used as the highlight oracle.

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::HighlightOracle;
use crate::config::{OracleConfig, API_KEY_ENV};
use crate::transcode::AudioBuffer;
use crate::{PipelineError, PipelineResult, Stage};

/// Gemini API client
pub struct GeminiOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: Blob<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    /// Canonical status name, e.g. `INVALID_ARGUMENT`
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    reason: Option<String>,
}

/// Statuses and reasons meaning the service cannot be used with these
/// credentials or quota, whatever the HTTP code
const UNAVAILABLE_REASONS: &[&str] = &[
    "API_KEY_INVALID",
    "PERMISSION_DENIED",
    "UNAUTHENTICATED",
    "RESOURCE_EXHAUSTED",
];

impl ErrorBody {
    fn is_unavailable(&self) -> bool {
        self.status
            .iter()
            .chain(self.details.iter().filter_map(|d| d.reason.as_ref()))
            .any(|code| UNAVAILABLE_REASONS.contains(&code.as_str()))
    }
}

impl GeminiOracle {
    /// Create a client from configuration; fails when no API key is available
    pub fn new(config: &OracleConfig) -> anyhow::Result<Self> {
        let api_key = config.resolve_api_key().with_context(|| {
            format!("No Gemini API key: set {} or oracle.api_key in the config file", API_KEY_ENV)
        })?;

        Self::with_endpoint(&config.endpoint, &config.model, api_key, config.timeout())
    }

    pub fn with_endpoint(
        endpoint: &str,
        model: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.into(),
            timeout,
        })
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }

    fn transport_error(&self, e: reqwest::Error) -> PipelineError {
        if e.is_timeout() {
            PipelineError::Timeout {
                stage: Stage::Analysis,
                after: self.timeout,
            }
        } else {
            PipelineError::OracleUnavailable(format!("Gemini request failed: {}", e))
        }
    }
}

fn status_error(status: StatusCode, body: &str) -> PipelineError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|envelope| envelope.error);
    let detail = match &parsed {
        Some(error) => error.message.clone(),
        None => body.chars().take(300).collect(),
    };
    let message = format!("Gemini API returned {}: {}", status, detail);

    if parsed.as_ref().is_some_and(ErrorBody::is_unavailable) {
        return PipelineError::OracleUnavailable(message);
    }

    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => PipelineError::OracleUnavailable(message),
        s if s.is_server_error() => PipelineError::OracleUnavailable(message),
        _ => PipelineError::OracleRejected(message),
    }
}

/// Pull the answer text out of a successful response
fn extract_text(response: GenerateResponse) -> PipelineResult<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(PipelineError::OracleRejected(format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::OracleRejected("no candidates in response".to_string()))?;

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    match candidate.finish_reason.as_deref() {
        Some(reason) if text.is_empty() && reason != "STOP" => Err(PipelineError::OracleRejected(
            format!("generation stopped: {}", reason),
        )),
        _ => Ok(text),
    }
}

#[async_trait]
impl HighlightOracle for GeminiOracle {
    async fn analyze(&self, audio: &AudioBuffer, instruction: &str) -> PipelineResult<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: instruction },
                    Part::InlineData {
                        inline_data: Blob {
                            mime_type: audio.mime_type,
                            data: base64::engine::general_purpose::STANDARD.encode(&audio.bytes),
                        },
                    },
                ],
            }],
        };

        tracing::info!("Sending {} of audio to {}", crate::utils::format_file_size(audio.len() as u64), self.model);

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            PipelineError::OracleUnavailable(format!("unexpected Gemini response envelope: {}", e))
        })?;

        let text = extract_text(parsed)?;
        tracing::debug!("Oracle answered with {} characters", text.len());
        Ok(text)
    }
}
