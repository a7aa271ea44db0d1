//! Route handlers and the error response mapping.

use super::AppState;
use crate::Error;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Free text that may contain sensitive terms.
    pub text: String,
    /// Model identifier forwarded upstream.
    pub model: String,
}

/// Successful response of `POST /api/query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Decoded completion.
    pub response: String,
}

/// Response of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy`.
    pub status: String,
}

/// Error rendered as `{"detail": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    /// Status code sent to the client.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Message sent to the client.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::RequestValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                detail: rejection.body_text(),
            };
        }
        Error::RequestValidation(rejection.body_text()).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = self.status.as_u16(), detail = %self.detail, "Request failed");
        } else {
            tracing::debug!(status = self.status.as_u16(), "Request rejected");
        }
        let body = serde_json::json!({ "detail": self.detail });
        (self.status, Json(body)).into_response()
    }
}

/// `POST /api/query`
pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload?;

    metrics::counter!("veil_http_queries_total").increment(1);
    let response = state
        .codec
        .answer_with_llm(&request.text, state.llm.as_ref(), &request.model)
        .await?;

    Ok(Json(QueryResponse { response }))
}

/// `GET /api/health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                Error::RequestValidation("missing field `model`".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                Error::Timeout {
                    operation: "chat_completion".to_string(),
                    after_ms: 30_000,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                Error::Upstream {
                    operation: "chat_completion".to_string(),
                    cause: "API returned status: 401".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                Error::Configuration("no terms".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let message = err.to_string();
            let api: ApiError = err.into();
            assert_eq!(api.status(), expected);
            assert_eq!(api.detail(), message);
        }
    }

    #[test]
    fn test_query_request_requires_both_fields() {
        assert!(serde_json::from_str::<QueryRequest>(r#"{"text": "hi"}"#).is_err());
        assert!(serde_json::from_str::<QueryRequest>(r#"{"model": "m"}"#).is_err());

        let request: QueryRequest =
            serde_json::from_str(r#"{"text": "hi", "model": "gpt-4o-mini"}"#).unwrap();
        assert_eq!(request.text, "hi");
        assert_eq!(request.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body.status, "healthy");
    }
}
