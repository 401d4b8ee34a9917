//! `/executor/*` — the in-cluster executor's surface: the push stream and
//! the short requests it uses to report results and capabilities.

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    response::sse::{KeepAlive, Sse},
};

use crate::error::{GatewayError, GatewayResult};
use crate::models::{CapabilityProfile, CommandResult, ReportCapabilitiesRequest};
use crate::state::AppState;

fn cluster_id(headers: &HeaderMap) -> GatewayResult<String> {
    headers
        .get("x-cluster-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(GatewayError::InvalidCredentials)
}

/// `GET /executor/stream` — a long-lived SSE stream delivering `connected`,
/// `command`, and `keepalive` events until the executor disconnects.
pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> GatewayResult<impl IntoResponse> {
    let cluster_id = cluster_id(&headers)?;
    let events = state.executor_channel.connect(cluster_id).await;
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// `POST /executor/results` — submit one result by `command_id`.
pub async fn submit_result(
    State(state): State<AppState>,
    Json(result): Json<CommandResult>,
) -> GatewayResult<impl IntoResponse> {
    state.executor_channel.submit_result(result).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `POST /executor/capabilities` — submit/refresh this executor's
/// capability profile.
pub async fn report_capabilities(
    State(state): State<AppState>,
    Json(req): Json<ReportCapabilitiesRequest>,
) -> GatewayResult<impl IntoResponse> {
    let profile: CapabilityProfile = state.capabilities.report(req).await?;
    Ok(Json(profile))
}
