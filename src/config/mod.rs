//! Configuration management.
//!
//! Sources, lowest to highest precedence: built-in defaults, a TOML file,
//! then `VEIL_*` environment variables.
//!
//! ```toml
//! [server]
//! port = 8000
//! allowed_origins = ["http://localhost", "http://localhost:80"]
//!
//! [llm]
//! endpoint = "https://api.studio.nebius.ai/v1"
//! api_key = "${NEBIUS_API_KEY}"
//! timeout_ms = 30000
//!
//! [substitution]
//! case_mode = "compatible"
//!
//! [[substitution.terms]]
//! sensitive = "Hogwarts"
//! replacement = "Hogsmith State Secondary School"
//! ```

use crate::codec::{CaseMode, ReplacementMap, SubstitutionCodec};
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration for veil.
#[derive(Debug, Clone, Default)]
pub struct VeilConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Upstream provider settings.
    pub llm: LlmConfig,
    /// Substitution terms and matching mode.
    pub substitution: SubstitutionConfig,
    /// Logging and metrics settings.
    pub logging: LoggingSettings,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec![
                "http://localhost".to_string(),
                "http://localhost:80".to_string(),
            ],
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Upstream LLM provider configuration.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API.
    pub endpoint: Option<String>,
    /// API key.
    pub api_key: Option<SecretString>,
    /// Model used when a caller does not name one (CLI only).
    pub default_model: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Retries for transient failures.
    pub max_retries: Option<u32>,
    /// Initial retry backoff in milliseconds.
    pub retry_backoff_ms: Option<u64>,
    /// Consecutive failures before the circuit opens.
    pub breaker_failure_threshold: Option<u32>,
    /// Milliseconds before an open circuit lets a trial call through.
    pub breaker_reset_ms: Option<u64>,
    /// Trial calls allowed while the circuit is half-open.
    pub breaker_half_open_max_calls: Option<u32>,
    /// Latency budget per call in milliseconds (0 disables the check).
    pub latency_slo_ms: Option<u64>,
}

/// Substitution configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionConfig {
    /// How matched spans are looked up.
    pub case_mode: CaseMode,
    /// Ordered term table.
    pub terms: Vec<TermEntry>,
}

impl Default for SubstitutionConfig {
    fn default() -> Self {
        Self {
            case_mode: CaseMode::default(),
            terms: vec![
                TermEntry::new("Hogwarts", "Hogsmith State Secondary School"),
                TermEntry::new("Albus Dumbledore", "Merlin"),
                TermEntry::new(
                    "Ministry of Magic",
                    "London Bureau of Immigration and Statistics",
                ),
            ],
        }
    }
}

/// One sensitive term and its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TermEntry {
    /// Term that must not reach the provider.
    pub sensitive: String,
    /// Innocuous stand-in.
    pub replacement: String,
}

impl TermEntry {
    /// Creates a term entry.
    #[must_use]
    pub fn new(sensitive: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            sensitive: sensitive.into(),
            replacement: replacement.into(),
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log format: "pretty" or "json".
    pub format: Option<String>,
    /// Default filter directive (e.g. `info`, `veil=debug`).
    pub level: Option<String>,
    /// Port for the Prometheus scrape endpoint.
    pub metrics_port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Server section.
    pub server: Option<ConfigFileServer>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Substitution section.
    pub substitution: Option<ConfigFileSubstitution>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Server section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileServer {
    /// Bind address.
    pub host: Option<String>,
    /// Bind port.
    pub port: Option<u16>,
    /// CORS origins.
    pub allowed_origins: Option<Vec<String>>,
    /// Body limit.
    pub max_body_bytes: Option<usize>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLlm {
    /// Base URL.
    pub endpoint: Option<String>,
    /// API key, literal or `${ENV_VAR}` reference.
    pub api_key: Option<String>,
    /// Default model.
    pub default_model: Option<String>,
    /// Request timeout.
    pub timeout_ms: Option<u64>,
    /// Connect timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Retries.
    pub max_retries: Option<u32>,
    /// Retry backoff.
    pub retry_backoff_ms: Option<u64>,
    /// Breaker threshold.
    pub breaker_failure_threshold: Option<u32>,
    /// Breaker reset.
    pub breaker_reset_ms: Option<u64>,
    /// Half-open trial calls.
    pub breaker_half_open_max_calls: Option<u32>,
    /// Latency budget.
    pub latency_slo_ms: Option<u64>,
}

/// Substitution section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileSubstitution {
    /// Case mode name.
    pub case_mode: Option<String>,
    /// Term table; replaces the built-in table when present.
    pub terms: Option<Vec<TermEntry>>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// Format.
    pub format: Option<String>,
    /// Level.
    pub level: Option<String>,
    /// Metrics port.
    pub metrics_port: Option<u16>,
}

impl VeilConfig {
    /// Loads configuration for the process: the explicit file if given,
    /// otherwise the default location, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        };
        Ok(config.with_env_overrides())
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `<config_dir>/veil/config.toml` and `~/.config/veil/config.toml`.
    /// Returns the built-in defaults if neither exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but is invalid.
    pub fn load_default() -> Result<Self> {
        for candidate in Self::default_paths() {
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "Loading config file");
                return Self::load_from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    /// Candidate config file locations in lookup order.
    #[must_use]
    pub fn default_paths() -> Vec<PathBuf> {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Vec::new();
        };

        let platform = base_dirs.config_dir().join("veil").join("config.toml");
        let xdg = base_dirs
            .home_dir()
            .join(".config")
            .join("veil")
            .join("config.toml");

        if platform == xdg {
            vec![platform]
        } else {
            vec![platform, xdg]
        }
    }

    /// Converts a `ConfigFile` to `VeilConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(server) = file.server {
            if let Some(host) = server.host {
                config.server.host = host;
            }
            if let Some(port) = server.port {
                config.server.port = port;
            }
            if let Some(origins) = server.allowed_origins {
                config.server.allowed_origins = origins;
            }
            if let Some(limit) = server.max_body_bytes {
                config.server.max_body_bytes = limit;
            }
        }

        if let Some(llm) = file.llm {
            config.llm = LlmConfig {
                endpoint: llm.endpoint,
                api_key: llm
                    .api_key
                    .and_then(|raw| expand_env_reference(&raw, |k| std::env::var(k).ok()))
                    .map(SecretString::from),
                default_model: llm.default_model,
                timeout_ms: llm.timeout_ms,
                connect_timeout_ms: llm.connect_timeout_ms,
                max_retries: llm.max_retries,
                retry_backoff_ms: llm.retry_backoff_ms,
                breaker_failure_threshold: llm.breaker_failure_threshold,
                breaker_reset_ms: llm.breaker_reset_ms,
                breaker_half_open_max_calls: llm.breaker_half_open_max_calls,
                latency_slo_ms: llm.latency_slo_ms,
            };
        }

        if let Some(substitution) = file.substitution {
            if let Some(mode) = substitution.case_mode {
                config.substitution.case_mode = parse_case_mode(&mode)?;
            }
            if let Some(terms) = substitution.terms {
                config.substitution.terms = terms;
            }
        }

        if let Some(logging) = file.logging {
            config.logging = LoggingSettings {
                format: logging.format,
                level: logging.level,
                metrics_port: logging.metrics_port,
            };
        }

        Ok(config)
    }

    /// Applies `VEIL_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup (the environment in
    /// production). Unparsable values are ignored with a warning.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("VEIL_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("VEIL_PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid VEIL_PORT"),
            }
        }
        if let Some(origins) = get("VEIL_ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(endpoint) = get("VEIL_LLM_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }
        if let Some(key) = get("VEIL_LLM_API_KEY") {
            self.llm.api_key = Some(SecretString::from(key));
        } else if self.llm.api_key.is_none() {
            self.llm.api_key = get("NEBIUS_API_KEY")
                .or_else(|| get("OPENAI_API_KEY"))
                .map(SecretString::from);
        }
        if let Some(model) = get("VEIL_DEFAULT_MODEL") {
            self.llm.default_model = Some(model);
        }

        if let Some(mode) = get("VEIL_CASE_MODE") {
            match parse_case_mode(&mode) {
                Ok(mode) => self.substitution.case_mode = mode,
                Err(_) => tracing::warn!("Ignoring invalid VEIL_CASE_MODE"),
            }
        }

        if let Some(format) = get("VEIL_LOG_FORMAT") {
            self.logging.format = Some(format);
        }
        if let Some(level) = get("VEIL_LOG") {
            self.logging.level = Some(level);
        }
        if let Some(port) = get("VEIL_METRICS_PORT") {
            match port.trim().parse() {
                Ok(port) => self.logging.metrics_port = Some(port),
                Err(_) => tracing::warn!("Ignoring invalid VEIL_METRICS_PORT"),
            }
        }

        self
    }

    /// Builds the ordered replacement map from the term table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on empty or duplicate terms.
    pub fn replacement_map(&self) -> Result<ReplacementMap> {
        ReplacementMap::from_pairs(
            self.substitution
                .terms
                .iter()
                .map(|t| (t.sensitive.as_str(), t.replacement.as_str())),
        )
    }

    /// Builds the substitution codec described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the term table is invalid or empty.
    pub fn build_codec(&self) -> Result<SubstitutionCodec> {
        SubstitutionCodec::with_case_mode(self.replacement_map()?, self.substitution.case_mode)
    }

    /// Sets the server port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Sets the server host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.server.host = host.into();
        self
    }
}

fn parse_case_mode(raw: &str) -> Result<CaseMode> {
    CaseMode::parse(raw).ok_or_else(|| {
        Error::Configuration(format!(
            "unknown case_mode '{raw}' (expected 'compatible' or 'folded')"
        ))
    })
}

/// Expands a whole-value `${VAR}` reference; literals pass through.
fn expand_env_reference<F>(raw: &str, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let trimmed = raw.trim();
    match trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => lookup(var).filter(|v| !v.is_empty()),
        None if trimmed.is_empty() => None,
        None => Some(trimmed.to_string()),
    }
}
