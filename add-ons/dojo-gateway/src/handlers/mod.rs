//! HTTP handlers and the error-to-status mapping.
//!
//! Validation failures (auth, ownership, velocity, quota) surface as discrete
//! JSON responses before any streaming begins; upstream failures after the
//! stream has opened are reported inline by the chat handler instead.

pub mod chat;
pub mod levels;
pub mod workspaces;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dojo_core::GatewayError;
use serde_json::json;

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError(e)
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError(GatewayError::Store(e.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            GatewayError::AuthenticationRequired => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Unauthorized access. System locked" }),
            ),
            GatewayError::TenantIsolation => (
                StatusCode::FORBIDDEN,
                json!({ "error": "Workspace not found or unauthorized" }),
            ),
            GatewayError::VelocityExceeded {
                action,
                retry_after_ms,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": format!("Velocity limit exceeded for {}. Please slow down.", action),
                    "cooldownRemaining": retry_after_ms,
                }),
            ),
            GatewayError::QuotaExhausted { unlock_at_ms } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({ "error": "Energy depleted", "unlockTime": unlock_at_ms }),
            ),
            GatewayError::UpstreamModel(detail) => {
                tracing::error!(target: "dojo::chat", "Upstream model failure: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "Upstream model failure" }),
                )
            }
            GatewayError::Store(detail) => {
                tracing::error!(target: "dojo::store", "Storage failure: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal storage failure" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "online" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError(GatewayError::AuthenticationRequired),
                StatusCode::UNAUTHORIZED,
            ),
            (ApiError(GatewayError::TenantIsolation), StatusCode::FORBIDDEN),
            (
                ApiError(GatewayError::VelocityExceeded {
                    action: "chat".into(),
                    retry_after_ms: 900,
                }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ApiError(GatewayError::QuotaExhausted { unlock_at_ms: 42 }),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                ApiError(GatewayError::UpstreamModel("boom".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError(GatewayError::Store("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
