//! Client side of the external scoring model.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::UpstreamConfig;

const SYSTEM_MESSAGE: &str = "You are an AI assistant that returns STRICT JSON only.";
const PING_PROMPT: &str = "Return only: {\"test\": true}";
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Black-box scoring service: prompt in, raw model text out.
#[async_trait]
pub trait ScoringModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, UpstreamError>;

    /// Minimal round trip used by readiness checks.
    async fn ping(&self) -> Result<(), UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),
    #[error("model request timed out")]
    Timeout,
    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected completion payload: {0}")]
    MalformedEnvelope(String),
}

impl UpstreamError {
    /// Rate limiting and timeouts are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::RateLimited(_) | UpstreamError::Timeout)
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited(body),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => UpstreamError::Timeout,
            _ => UpstreamError::Status {
                status: status.as_u16(),
                body,
            },
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if let Some(status) = err.status() {
            UpstreamError::from_status(status, err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

/// `ScoringModel` backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    request_timeout: Duration,
}

impl OpenAiChatModel {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            request_timeout: config.request_timeout,
        })
    }

    async fn chat(&self, body: Value, timeout: Duration) -> Result<String, UpstreamError> {
        debug!(model = %self.model, "calling scoring model");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, body));
        }

        let payload: Value = response.json().await?;
        extract_content(&payload)
    }
}

#[async_trait]
impl ScoringModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, UpstreamError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": SYSTEM_MESSAGE },
                { "role": "user", "content": prompt },
            ],
        });
        self.chat(body, self.request_timeout).await
    }

    async fn ping(&self) -> Result<(), UpstreamError> {
        let body = json!({
            "model": self.model,
            "max_tokens": 10,
            "messages": [{ "role": "user", "content": PING_PROMPT }],
        });
        self.chat(body, PING_TIMEOUT).await.map(|_| ())
    }
}

fn extract_content(payload: &Value) -> Result<String, UpstreamError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| {
            UpstreamError::MalformedEnvelope("missing choices[0].message.content".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_statuses() {
        assert!(matches!(
            UpstreamError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            UpstreamError::RateLimited(_)
        ));
        assert_eq!(
            UpstreamError::from_status(StatusCode::GATEWAY_TIMEOUT, String::new()),
            UpstreamError::Timeout
        );
        assert_eq!(
            UpstreamError::from_status(StatusCode::BAD_GATEWAY, "down".to_string()),
            UpstreamError::Status {
                status: 502,
                body: "down".to_string()
            }
        );
    }

    #[test]
    fn only_rate_limits_and_timeouts_are_transient() {
        assert!(UpstreamError::RateLimited(String::new()).is_transient());
        assert!(UpstreamError::Timeout.is_transient());
        assert!(!UpstreamError::Transport("refused".to_string()).is_transient());
        assert!(!UpstreamError::MalformedEnvelope(String::new()).is_transient());
    }

    #[test]
    fn extracts_trimmed_message_content() {
        let payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": "  [] \n" } }]
        });
        assert_eq!(extract_content(&payload).expect("content present"), "[]");
        assert!(matches!(
            extract_content(&json!({ "choices": [] })),
            Err(UpstreamError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = UpstreamConfig {
            api_key: "sk-test".to_string(),
            base_url: "http://localhost:8080/v1/".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_retries: 2,
            retry_backoff: Duration::from_millis(10),
            request_timeout: Duration::from_secs(1),
            temperature: 0.0,
        };
        let model = OpenAiChatModel::new(&config).expect("client builds");
        assert_eq!(model.endpoint, "http://localhost:8080/v1/chat/completions");
    }
}
