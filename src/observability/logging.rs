//! Structured logging configuration.

use crate::config::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Default filter when neither `RUST_LOG` nor config names one.
const DEFAULT_FILTER: &str = "info";

/// Filter used with `--verbose`.
const VERBOSE_FILTER: &str = "veil=debug,tower_http=debug,info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name; unknown names fall back to pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directives.
    pub filter: EnvFilter,
}

impl LoggingConfig {
    /// Builds logging configuration from settings.
    ///
    /// Precedence for the filter: `--verbose`, then `RUST_LOG`, then the
    /// configured level, then `info`.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let format = settings
            .format
            .as_deref()
            .map(LogFormat::parse)
            .unwrap_or_default();

        let filter = if verbose {
            EnvFilter::new(VERBOSE_FILTER)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::try_new(settings.level.as_deref().unwrap_or(DEFAULT_FILTER))
                    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
            })
        };

        Self { format, filter }
    }
}
