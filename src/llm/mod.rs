//! Upstream LLM client abstraction.
//!
//! Provides a narrow interface over chat-completion providers: one user
//! message in, the first completion's text out.

mod openai;
mod resilience;

pub use openai::OpenAiClient;
pub use resilience::{LlmResilienceConfig, ResilientLlmProvider};

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Sends `prompt` as the only user message of a new chat on `model` and
    /// returns the first completion's content.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Upstream`] if the call fails or yields no
    /// completion, [`crate::Error::Timeout`] if it exceeds the deadline.
    async fn complete(&self, model: &str, prompt: &str) -> Result<String>;
}

/// HTTP client configuration for LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Loads HTTP configuration from config file settings.
    #[must_use]
    pub fn from_config(config: &crate::config::LlmConfig) -> Self {
        let mut settings = Self::default();
        if let Some(timeout_ms) = config.timeout_ms {
            settings.timeout_ms = timeout_ms;
        }
        if let Some(connect_timeout_ms) = config.connect_timeout_ms {
            settings.connect_timeout_ms = connect_timeout_ms;
        }
        settings
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(timeout_ms) = env_parse::<u64>("VEIL_LLM_TIMEOUT_MS") {
            self.timeout_ms = timeout_ms;
        }
        if let Some(connect_timeout_ms) = env_parse::<u64>("VEIL_LLM_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = connect_timeout_ms;
        }
        self
    }
}

/// Builds an async HTTP client for LLM requests with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::Client::new()
    })
}

/// Reads and parses an environment variable, ignoring unparsable values.
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = LlmHttpConfig::default();
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.connect_timeout_ms, 3_000);
    }

    #[test]
    fn test_http_config_from_config() {
        let llm = crate::config::LlmConfig {
            timeout_ms: Some(5_000),
            connect_timeout_ms: None,
            ..Default::default()
        };
        let config = LlmHttpConfig::from_config(&llm);
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.connect_timeout_ms, 3_000);
    }

    #[test]
    fn test_build_http_client_without_timeouts() {
        let _client = build_http_client(LlmHttpConfig {
            timeout_ms: 0,
            connect_timeout_ms: 0,
        });
    }
}
