use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use gateway_common::response::print_error;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("session {session_id} belongs to cluster '{actual}', not '{requested}'")]
    SessionClusterMismatch {
        session_id: String,
        actual: String,
        requested: String,
    },

    #[error("keystore unavailable: {source}")]
    ServiceUnavailable {
        #[from]
        source: anyhow::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::SessionClusterMismatch { .. } => StatusCode::BAD_REQUEST,
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if matches!(
            status,
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE
        ) {
            print_error(anyhow::anyhow!("{self}"));
        }

        (status, Json(json!({"reason": self.to_string()}))).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
