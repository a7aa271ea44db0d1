//! Prometheus metrics.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether the exporter is installed.
    pub enabled: bool,
    /// Address to bind the scrape endpoint.
    pub listen_addr: SocketAddr,
}

impl MetricsConfig {
    /// Builds metrics configuration from settings. Metrics are enabled when a
    /// port is configured.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        settings.metrics_port.map_or(
            Self {
                enabled: false,
                listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9090),
            },
            |port| Self {
                enabled: true,
                listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            },
        )
    }
}

/// Installs the Prometheus recorder and its HTTP listener.
///
/// Must run inside a tokio runtime. Without a recorder the `metrics` macros
/// are no-ops.
pub fn install_prometheus(config: &MetricsConfig) -> Result<bool> {
    if !config.enabled {
        return Ok(false);
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .install()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_install".to_string(),
            cause: e.to_string(),
        })?;

    tracing::info!(addr = %config.listen_addr, "Prometheus metrics exporter listening");
    Ok(true)
}
