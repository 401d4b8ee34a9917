//! Authentication middleware applied to the public surface.
//!
//! Rejects requests without an accepted credential, except for the
//! discovery path and health probes (mounted outside this layer entirely —
//! see `server.rs`) and loopback callers, exempted by resolved peer address
//! rather than a forgeable header.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::GatewayError;
use crate::state::AppState;

/// The identity resolved by `require_caller_auth`, stashed in request
/// extensions for handlers/audit to read back without re-authenticating.
#[derive(Clone, Debug)]
pub struct CallerIdentity(pub Option<String>);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_loopback(req: &Request) -> bool {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().is_loopback())
        .unwrap_or(false)
}

/// Applied to `/debug/*` and `/admin/*`. Honors the
/// `--execute-requires-api-key` flag for `/debug/execute` specifically,
/// an asymmetric credential requirement some deployments need.
pub async fn require_caller_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if is_loopback(&req) {
        return Ok(next.run(req).await);
    }

    let path = req.uri().path().to_string();
    let headers = req.headers();
    let api_key = header_str(headers, "x-api-key").map(str::to_string);
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let caller_ip = gateway_common::get_source_ip(headers).map(|ip| ip.to_string());

    let execute_requires_api_key = state.config.execute_requires_api_key && path == "/debug/execute";
    let outcome = if execute_requires_api_key {
        match &api_key {
            Some(key) => state.auth.authenticate(Some(key), None, caller_ip).await?,
            None => return Err(GatewayError::InvalidCredentials),
        }
    } else {
        state
            .auth
            .authenticate(api_key.as_deref(), bearer.as_deref(), caller_ip)
            .await?
    };

    let mut req = req;
    req.extensions_mut().insert(CallerIdentity(outcome.identity));
    Ok(next.run(req).await)
}

/// Applied to `/executor/*`. Validates the bearer against the cluster's
/// stored executor token — the `X-Cluster-Id` header names the cluster.
pub async fn require_executor_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let headers = req.headers();
    let cluster_id = header_str(headers, "x-cluster-id")
        .map(str::to_string)
        .ok_or(GatewayError::InvalidCredentials)?;
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(GatewayError::InvalidCredentials)?;

    if !state.auth.authenticate_executor(bearer, &cluster_id).await? {
        return Err(GatewayError::InvalidCredentials);
    }

    Ok(next.run(req).await)
}

