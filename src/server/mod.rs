//! HTTP surface.
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /api/query` | Mask, forward, unmask; `{text, model}` -> `{response}` |
//! | `GET /api/health` | Liveness probe, always `{"status": "healthy"}` |
//!
//! Errors are returned as `{"detail": message}`: 422 for malformed bodies,
//! 413 for oversized ones, 504 for upstream timeouts and 500 otherwise.

mod handlers;

pub use handlers::{ApiError, HealthResponse, QueryRequest, QueryResponse};

use crate::codec::SubstitutionCodec;
use crate::config::ServerConfig;
use crate::llm::LlmProvider;
use crate::{Error, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, header};
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Shared request state.
///
/// Built once at startup and injected into the router; nothing is held in
/// process-global state, so several routers can run side by side.
#[derive(Clone)]
pub struct AppState {
    /// Substitution codec.
    pub codec: Arc<SubstitutionCodec>,
    /// Upstream provider.
    pub llm: Arc<dyn LlmProvider>,
}

impl AppState {
    /// Creates the shared state.
    #[must_use]
    pub fn new(codec: Arc<SubstitutionCodec>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { codec, llm }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("terms", &self.codec.len())
            .field("provider", &self.llm.name())
            .finish()
    }
}

/// Builds the CORS layer for the configured origins.
///
/// Methods and headers are mirrored from the preflight request; a literal
/// wildcard is not allowed together with credentials.
#[must_use]
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            },
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Builds the application router.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/api/query", post(handlers::query))
        .route("/api/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        // Security headers (OWASP recommendations)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors_layer(&config.allowed_origins))
        .with_state(state)
}

/// Binds the configured address and serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address is invalid, cannot be bound, or the
/// serve loop fails.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Configuration(format!("invalid bind address: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "bind".to_string(),
            cause: format!("{addr}: {e}"),
        })?;

    tracing::info!(
        %addr,
        origins = config.allowed_origins.len(),
        terms = state.codec.len(),
        provider = state.llm.name(),
        "Starting veil HTTP server"
    );

    axum::serve(listener, router(state, config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "serve".to_string(),
            cause: e.to_string(),
        })
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
