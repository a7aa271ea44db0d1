//! # Veil
//!
//! A privacy proxy for large-language-model APIs.
//!
//! Veil swaps configured sensitive terms for innocuous replacements before a
//! query leaves the process, forwards the masked query to an upstream
//! chat-completions provider, and restores the original terms in the answer.
//!
//! ## Features
//!
//! - Whole-word, case-insensitive substitution codec with a reversible map
//! - OpenAI-compatible upstream client with timeouts and optional retries
//! - Small axum HTTP surface (`/api/query`, `/api/health`) with strict CORS
//! - Explicitly injected configuration, no process-global codec
//!
//! ## Example
//!
//! ```rust
//! use veil::codec::{ReplacementMap, SubstitutionCodec};
//!
//! let mut map = ReplacementMap::new();
//! map.insert("Hogwarts", "Hogsmith State Secondary School")?;
//! let codec = SubstitutionCodec::new(map)?;
//!
//! let masked = codec.encode("I love Hogwarts");
//! assert_eq!(masked, "I love Hogsmith State Secondary School");
//! assert_eq!(codec.decode(&masked), "I love Hogwarts");
//! # Ok::<(), veil::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod codec;
pub mod config;
pub mod llm;
pub mod observability;
pub mod server;

// Re-exports for convenience
pub use codec::{CaseMode, ReplacementMap, SubstitutionCodec};
pub use config::VeilConfig;
pub use llm::LlmProvider;
pub use server::{AppState, router};

/// Error type for veil operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Configuration` | Empty or duplicate replacement terms, unreadable config file |
/// | `Upstream` | Provider call fails, returns non-2xx, or returns no completion |
/// | `Timeout` | Provider call exceeds the configured request timeout |
/// | `RequestValidation` | Malformed `/api/query` body, missing `text` or `model` |
/// | `OperationFailed` | Socket bind, serve loop, or telemetry setup fails |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The substitution map or configuration is invalid.
    ///
    /// Raised when:
    /// - The replacement map is empty at codec construction
    /// - A sensitive term is inserted twice
    /// - A term or replacement is empty
    /// - The config file cannot be read or parsed
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The upstream LLM provider failed.
    ///
    /// Raised when:
    /// - The request cannot be sent (DNS, TLS, connection refused)
    /// - The provider answers with a non-success status (auth, rate limit)
    /// - The response has no choices or no message content
    /// - The circuit breaker is open
    #[error("upstream '{operation}' failed: {cause}")]
    Upstream {
        /// The upstream operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The upstream call did not finish in time.
    #[error("upstream '{operation}' timed out after {after_ms}ms")]
    Timeout {
        /// The upstream operation that timed out.
        operation: String,
        /// The configured timeout in milliseconds.
        after_ms: u64,
    },

    /// A request at the HTTP boundary was malformed.
    #[error("invalid request: {0}")]
    RequestValidation(String),

    /// A local operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for veil operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Configuration("replacement map is empty".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: replacement map is empty"
        );

        let err = Error::Upstream {
            operation: "chat_completion".to_string(),
            cause: "no choices in response".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "upstream 'chat_completion' failed: no choices in response"
        );

        let err = Error::Timeout {
            operation: "chat_completion".to_string(),
            after_ms: 30_000,
        };
        assert_eq!(
            err.to_string(),
            "upstream 'chat_completion' timed out after 30000ms"
        );

        let err = Error::RequestValidation("missing field `model`".to_string());
        assert_eq!(err.to_string(), "invalid request: missing field `model`");
    }
}
