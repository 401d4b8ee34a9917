//! `/admin/*` — executor token lifecycle, cluster listing, and executor
//! status, mirroring the semantics of `crate::admin::AdminSurface`.

use axum::{Json, extract::Path, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use crate::error::GatewayResult;
use crate::models::{CapabilityProfile, ClusterListResponse, ExecutorStatusResponse, ExecutorTokenResponse};
use crate::state::AppState;

pub async fn list_agents(State(state): State<AppState>) -> GatewayResult<impl IntoResponse> {
    let response: Vec<ExecutorStatusResponse> = state.admin.list_executors().await?;
    Ok(Json(response))
}

pub async fn list_capabilities(State(state): State<AppState>) -> GatewayResult<impl IntoResponse> {
    let response: Vec<CapabilityProfile> = state.admin.list_capabilities().await?;
    Ok(Json(response))
}

pub async fn list_clusters(State(state): State<AppState>) -> GatewayResult<impl IntoResponse> {
    let response: ClusterListResponse = state.admin.list_clusters().await?;
    Ok(Json(response))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> GatewayResult<impl IntoResponse> {
    let status = state.admin.get_executor_status(&cluster_id).await?;
    Ok(Json(status))
}

pub async fn create_token(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> GatewayResult<impl IntoResponse> {
    let token = state.admin.create_executor_token(&cluster_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ExecutorTokenResponse {
            token,
            cluster_id,
            created_at: Utc::now(),
        }),
    ))
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> GatewayResult<impl IntoResponse> {
    state.admin.revoke_executor_token(&cluster_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
