//! `/debug/*` — the client-facing surface: sessions and command execution.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    ClusterListResponse, CreateSessionRequest, ExecuteRequest, ExecuteResponse,
    MAX_COMMAND_TIMEOUT_SECONDS, MAX_SESSION_TTL_SECONDS, MIN_COMMAND_TIMEOUT_SECONDS,
    MIN_SESSION_TTL_SECONDS, SessionResponse, compose_args, validate_args, validate_cluster_id,
    validate_command_type, validate_extra_args,
};
use crate::router::ExecuteParams;
use crate::session::SessionRegistry;
use crate::state::AppState;

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> GatewayResult<impl IntoResponse> {
    validate_cluster_id(&req.cluster_id).map_err(GatewayError::Forbidden)?;

    let ttl_seconds = match req.ttl_seconds {
        Some(ttl) if (MIN_SESSION_TTL_SECONDS..=MAX_SESSION_TTL_SECONDS).contains(&ttl) => Some(ttl),
        Some(ttl) => {
            return Err(GatewayError::Forbidden(format!(
                "ttl_seconds must be between {MIN_SESSION_TTL_SECONDS} and {MAX_SESSION_TTL_SECONDS}, got {ttl}"
            )));
        }
        None => None,
    };

    let correlation_id = header_value(&headers, "x-correlation-id");
    let service_identity = header_value(&headers, "x-service-identity");

    let session = state
        .sessions
        .create_session(&req.cluster_id, req.user_id, correlation_id, service_identity, ttl_seconds)
        .await?;

    let status = SessionRegistry::status_of(&session);
    Ok((StatusCode::CREATED, Json(SessionResponse { session, status })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GatewayResult<impl IntoResponse> {
    let session = state
        .sessions
        .get_session(id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("session '{id}' not found")))?;
    let status = SessionRegistry::status_of(&session);
    Ok(Json(SessionResponse { session, status }))
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GatewayResult<impl IntoResponse> {
    state.sessions.end_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExecuteRequest>,
) -> GatewayResult<impl IntoResponse> {
    validate_cluster_id(&req.cluster_id).map_err(GatewayError::Forbidden)?;
    validate_command_type(&req.command_type).map_err(GatewayError::Forbidden)?;
    validate_args(&req.args).map_err(GatewayError::Forbidden)?;
    validate_extra_args(&req.extra_args).map_err(GatewayError::Forbidden)?;

    let timeout_seconds = match req.timeout_seconds {
        Some(t) if (MIN_COMMAND_TIMEOUT_SECONDS..=MAX_COMMAND_TIMEOUT_SECONDS).contains(&t) => t,
        Some(t) => {
            return Err(GatewayError::Forbidden(format!(
                "timeout_seconds must be between {MIN_COMMAND_TIMEOUT_SECONDS} and {MAX_COMMAND_TIMEOUT_SECONDS}, got {t}"
            )));
        }
        None => state.config.default_command_timeout_seconds,
    };

    let args = compose_args(&req.command_type, &req.args, req.namespace.as_deref(), &req.extra_args);
    let correlation_id = header_value(&headers, "x-correlation-id");

    let response: ExecuteResponse = state
        .router
        .execute(ExecuteParams {
            cluster_id: req.cluster_id,
            args,
            timeout_seconds,
            correlation_id,
            session_id: req.session_id,
        })
        .await?;

    Ok(Json(response))
}

pub async fn list_clusters(State(state): State<AppState>) -> GatewayResult<impl IntoResponse> {
    let response: ClusterListResponse = state.admin.list_clusters().await?;
    Ok(Json(response))
}
