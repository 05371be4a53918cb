//! OpenRouter-backed chat transport.
//!
//! One narrow seam: a list of chat messages in, the raw completion text
//! out. Transient provider failures are retried a bounded number of times
//! without sleeping between attempts; everything else surfaces as a
//! [`ServiceError`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use takeoff_core::config::LlmConfig;
use takeoff_core::services::ServiceError;

/// HTTP statuses worth another attempt: rate limiting and upstream blips.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Chat completion transport. Implementations return the assistant message
/// content verbatim; parsing is the caller's concern.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ServiceError>;
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl OpenRouterClient {
    /// Builds a client from the loaded configuration. A missing API key is
    /// fatal here rather than at call time, so commands that need the
    /// provider fail before any work is persisted.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ServiceError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ServiceError::CredentialsMissing(
                "llm.api_key is not set (see TAKEOFF_LLM_API_KEY)".to_string(),
            )
        })?;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ServiceError::Unavailable(error.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_retries: config.max_retries.max(1),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatClient for OpenRouterClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0,
            "response_format": {"type": "json_object"},
        });

        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            let sent = self
                .http
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(error) => {
                    warn!(
                        event_name = "llm.chat.retry",
                        attempt,
                        error = %error,
                        "provider request failed"
                    );
                    last_error = Some(ServiceError::Unavailable(error.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let payload: Value = response
                    .json()
                    .await
                    .map_err(|error| ServiceError::Malformed(error.to_string()))?;
                let content = payload
                    .pointer("/choices/0/message/content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ServiceError::Malformed(
                            "completion carried no choices[0].message.content".to_string(),
                        )
                    })?;
                return Ok(content.to_string());
            }

            if RETRYABLE_STATUSES.contains(&status.as_u16()) {
                warn!(
                    event_name = "llm.chat.retry",
                    attempt,
                    status = status.as_u16(),
                    "transient provider status"
                );
                last_error =
                    Some(ServiceError::Unavailable(format!("provider returned {status}")));
                continue;
            }

            return Err(ServiceError::Unavailable(format!("provider returned {status}")));
        }

        Err(last_error
            .unwrap_or_else(|| ServiceError::Unavailable("no attempt was made".to_string())))
    }
}

/// Pulls a JSON document out of the completion text. Accepts raw JSON or a
/// single fenced code block (with or without a `json` tag).
pub fn extract_json_block(text: &str) -> Result<Value, ServiceError> {
    let trimmed = text.trim();
    let candidate = fenced_body(trimmed).unwrap_or(trimmed);
    serde_json::from_str(candidate)
        .map_err(|error| ServiceError::Malformed(format!("response is not valid JSON: {error}")))
}

fn fenced_body(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use takeoff_core::config::LlmConfig;
    use takeoff_core::services::ServiceError;

    use super::{extract_json_block, OpenRouterClient};

    fn config_with_key(api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            api_key: api_key.map(|key| key.to_string().into()),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }

    #[test]
    fn missing_api_key_fails_at_construction() {
        let error = OpenRouterClient::from_config(&config_with_key(None))
            .err()
            .expect("construction must fail");
        assert!(matches!(error, ServiceError::CredentialsMissing(_)));
        assert!(!error.is_degradable());
    }

    #[test]
    fn configured_key_builds_a_client() {
        let client =
            OpenRouterClient::from_config(&config_with_key(Some("sk-or-test"))).expect("client");
        assert_eq!(client.model(), "openai/gpt-4o-mini");
    }

    #[test]
    fn raw_json_passes_through() {
        let value = extract_json_block(r#"{"rooms": []}"#).expect("json");
        assert!(value["rooms"].as_array().expect("array").is_empty());
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "Here you go:\n```json\n{\"selected\": [\"CC-RCC-SLAB-M20\"]}\n```\n";
        let value = extract_json_block(text).expect("json");
        assert_eq!(value["selected"][0], "CC-RCC-SLAB-M20");
    }

    #[test]
    fn untagged_fence_is_unwrapped() {
        let value = extract_json_block("```\n{\"notes\": null}\n```").expect("json");
        assert!(value["notes"].is_null());
    }

    #[test]
    fn prose_is_rejected_as_malformed() {
        let error = extract_json_block("I could not find any rooms in that text.")
            .err()
            .expect("must fail");
        assert!(matches!(error, ServiceError::Malformed(_)));
    }
}
