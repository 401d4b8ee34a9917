//! HTTP server assembly: open surface, caller-authenticated surface,
//! executor-authenticated surface, merged and served behind graceful
//! shutdown.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use gateway_common::rate_limit::{RateLimiter, RateLimiterConfig, middleware::RateLimitLayer};
use gateway_common::shutdown::shutdown_signal;
use owo_colors::OwoColorize;
use tokio::net::TcpListener;

use crate::args::ServerArgs;
use crate::handlers::{admin, debug, executor, health};
use crate::middleware::{require_caller_auth, require_executor_auth};
use crate::state::AppState;

pub async fn run_server(args: ServerArgs) -> Result<()> {
    let redis_pool = gateway_common::redis::init_redis(&args.redis).await;
    let state = AppState::build(&args, redis_pool.clone()).await?;

    let rate_limiter = RateLimiter::new(redis_pool, RateLimiterConfig::from(args.rate_limiter.clone()));

    let open = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/health", get(health::health))
        .route("/.well-known/auth-config", get(health::auth_config))
        .with_state(state.clone())
        .layer(middleware::from_fn(gateway_common::access_log::public));

    let debug_router = Router::new()
        .route("/debug/session", post(debug::create_session))
        .route(
            "/debug/session/{id}",
            get(debug::get_session).delete(debug::end_session),
        )
        .route("/debug/execute", post(debug::execute))
        .route("/debug/clusters", get(debug::list_clusters))
        .layer(middleware::from_fn_with_state(state.clone(), require_caller_auth))
        .layer(middleware::from_fn(gateway_common::access_log::public))
        .with_state(state.clone());

    let admin_router = Router::new()
        .route("/admin/agents", get(admin::list_agents))
        .route("/admin/clusters", get(admin::list_clusters))
        .route("/admin/capabilities", get(admin::list_capabilities))
        .route("/admin/agents/{cluster_id}/status", get(admin::get_status))
        .route(
            "/admin/agents/{cluster_id}/token",
            post(admin::create_token).delete(admin::revoke_token),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_caller_auth))
        .layer(middleware::from_fn(gateway_common::access_log::admin))
        .with_state(state.clone());

    let executor_router = Router::new()
        .route("/executor/stream", get(executor::stream))
        .route("/executor/results", post(executor::submit_result))
        .route("/executor/capabilities", post(executor::report_capabilities))
        .layer(middleware::from_fn_with_state(state.clone(), require_executor_auth))
        .layer(middleware::from_fn(gateway_common::access_log::internal))
        .with_state(state.clone());

    let app = open
        .merge(debug_router)
        .merge(admin_router)
        .merge(executor_router)
        .layer(RateLimitLayer::new(rate_limiter))
        .layer(middleware::from_fn(gateway_common::middleware::extract_context))
        .layer(gateway_common::cors::dev());

    let addr: SocketAddr = format!("0.0.0.0:{}", args.bind_port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| {
            eprintln!("{}", format!("❌ Failed to bind server to {addr}: {e}").red());
            e
        })
        .context("failed to bind server")?;

    println!(
        "{}{}",
        "🚀 Starting debug-gateway server • port=".green(),
        format!("{}", args.bind_port).green().dimmed()
    );
    tracing::info!(%addr, "starting debug-gateway HTTP server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("failed to start server")?;

    println!("{}", "🛑 debug-gateway server stopped gracefully.".red());
    Ok(())
}
