//! Open, unauthenticated surface: liveness, readiness, and auth discovery.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::state::AppState;

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

/// Detailed readiness: confirms the keystore is reachable.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.keystore.exists("healthz/probe").await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ok", "keystore": "reachable"}))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded", "keystore": e.to_string()})),
        ),
    }
}

/// `GET /.well-known/auth-config` — advertises which auth methods are
/// configured, so clients don't have to guess.
pub async fn auth_config(State(state): State<AppState>) -> impl IntoResponse {
    let mut methods = vec!["api_key"];
    if state.auth.jwt_enabled() {
        methods.push("jwt");
    }
    Json(json!({ "methods": methods }))
}
