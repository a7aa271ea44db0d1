//! OpenAI-compatible chat completions client.
//!
//! Works against any endpoint that speaks the `/chat/completions` protocol.
//! The default endpoint is Nebius AI Studio.

use super::{LlmHttpConfig, LlmProvider, build_http_client};
use crate::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Operation label used in errors and spans.
const OPERATION: &str = "chat_completion";

/// Environment variables [`OpenAiClient::new`] reads the key from, in order.
const API_KEY_ENV_VARS: [&str; 2] = ["NEBIUS_API_KEY", "OPENAI_API_KEY"];

/// Longest provider error message carried into [`Error::Upstream`].
const MAX_ERROR_DETAIL_CHARS: usize = 200;

/// OpenAI-compatible LLM client.
pub struct OpenAiClient {
    /// API key.
    api_key: Option<SecretString>,
    /// API endpoint (without trailing slash).
    endpoint: String,
    /// HTTP settings the client was built with.
    http_config: LlmHttpConfig,
    /// HTTP client.
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.studio.nebius.ai/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Creates a client reading the key from `NEBIUS_API_KEY`, falling back to
    /// `OPENAI_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        let api_key = API_KEY_ENV_VARS
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
            .map(SecretString::from);
        let http_config = LlmHttpConfig::from_env();
        Self {
            api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            http_config,
            client: build_http_client(http_config),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Sets the API key from an existing secret.
    #[must_use]
    pub fn with_secret_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Rebuilds the HTTP client with the given timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.http_config = config;
        self.client = build_http_client(config);
        self
    }

    /// Returns the configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Validates that the client is configured.
    fn validate(&self) -> Result<&SecretString> {
        self.api_key.as_ref().ok_or_else(|| Error::Upstream {
            operation: OPERATION.to_string(),
            cause: format!(
                "API key not configured (set {})",
                API_KEY_ENV_VARS.join(" or ")
            ),
        })
    }

    /// Maps a transport error, keeping timeouts distinct.
    fn transport_error(&self, err: &reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                operation: OPERATION.to_string(),
                after_ms: self.http_config.timeout_ms,
            }
        } else {
            Error::Upstream {
                operation: OPERATION.to_string(),
                cause: err.to_string(),
            }
        }
    }

    /// Makes a request to the chat completions API.
    async fn request(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String> {
        let api_key = self.validate()?;

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                operation: OPERATION.to_string(),
                cause: format!("API returned status: {status} - {}", error_detail(&body)),
            });
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(&e))?;

        first_completion(response)
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: Some(prompt.to_string()),
        }];

        self.request(model, messages).await
    }
}

/// Extracts the first choice's content.
fn first_completion(response: ChatCompletionResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Upstream {
            operation: OPERATION.to_string(),
            cause: "No choices in response".to_string(),
        })?;

    choice.message.content.ok_or_else(|| Error::Upstream {
        operation: OPERATION.to_string(),
        cause: "First choice has no message content".to_string(),
    })
}

/// Pulls `error.message` out of a provider error body, bounded in length.
fn error_detail(body: &str) -> String {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map_or_else(|| body.trim().to_string(), |parsed| parsed.error.message);

    if message.chars().count() > MAX_ERROR_DETAIL_CHARS {
        let truncated: String = message.chars().take(MAX_ERROR_DETAIL_CHARS).collect();
        format!("{truncated}...")
    } else {
        message
    }
}

/// Request to the Chat Completions API.
///
/// Temperature and token limits are left to the provider defaults.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

/// A message in the chat.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

/// A choice in the response.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Error envelope returned by OpenAI-compatible APIs.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorMessage {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_without_key() -> OpenAiClient {
        OpenAiClient {
            api_key: None,
            endpoint: OpenAiClient::DEFAULT_ENDPOINT.to_string(),
            http_config: LlmHttpConfig::default(),
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = OpenAiClient::new();
        assert_eq!(client.name(), "openai");
        assert_eq!(client.endpoint(), OpenAiClient::DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_client_configuration() {
        let client = OpenAiClient::new()
            .with_api_key("test-key")
            .with_endpoint("https://custom.endpoint/v1/");

        assert_eq!(
            client.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("test-key".to_string())
        );
        assert_eq!(client.endpoint(), "https://custom.endpoint/v1");
    }

    #[test]
    fn test_validate_no_key() {
        let client = client_without_key();
        let result = client.validate();
        assert!(matches!(result, Err(Error::Upstream { .. })));
    }

    #[tokio::test]
    async fn test_complete_without_key_fails_before_network() {
        let client = client_without_key().with_endpoint("http://127.0.0.1:9");
        let err = client.complete("gpt-4o-mini", "hi").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("API key not configured"));
        assert!(message.contains("NEBIUS_API_KEY or OPENAI_API_KEY"));
        assert!(!message.contains("VEIL_LLM_API_KEY"));
    }

    #[test]
    fn test_request_omits_temperature() {
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some("hello".to_string()),
            }],
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hello"}]
            })
        );
    }

    #[test]
    fn test_first_completion_takes_first_choice() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [
                {"message": {"role": "assistant", "content": "first"}},
                {"message": {"role": "assistant", "content": "second"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(first_completion(response).unwrap(), "first");
    }

    #[test]
    fn test_first_completion_no_choices() {
        let response: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let err = first_completion(response).unwrap_err();
        assert!(err.to_string().contains("No choices"));
    }

    #[test]
    fn test_first_completion_null_content() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            first_completion(response),
            Err(Error::Upstream { .. })
        ));
    }

    #[test]
    fn test_error_detail_extracts_message() {
        let body = r#"{"error": {"message": "Invalid API key", "type": "auth"}}"#;
        assert_eq!(error_detail(body), "Invalid API key");
        assert_eq!(error_detail("  gateway down \n"), "gateway down");

        let long = "x".repeat(500);
        let detail = error_detail(&long);
        assert!(detail.ends_with("..."));
        assert_eq!(detail.chars().count(), MAX_ERROR_DETAIL_CHARS + 3);
    }
}
