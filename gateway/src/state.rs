//! Typed application context. Constructed once at startup and passed
//! explicitly to every handler — no hidden globals.

use std::sync::Arc;

use gateway_common::args::RedisArgs;
use gateway_common::wait_registry::DirectWaitRegistry;

use crate::admin::AdminSurface;
use crate::args::ServerArgs;
use crate::auth::{ApiKeys, Auth, JwtConfig};
use crate::capability::CapabilityRegistry;
use crate::executor_channel::ExecutorChannel;
use crate::keystore::Keystore;
use crate::router::CommandRouter;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppConfig {
    pub execute_requires_api_key: bool,
    pub default_session_ttl_seconds: u64,
    pub default_command_timeout_seconds: u64,
    pub cluster_active_ttl_seconds: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub keystore: Keystore,
    pub auth: Arc<Auth>,
    pub sessions: SessionRegistry,
    pub router: Arc<CommandRouter>,
    pub executor_channel: ExecutorChannel,
    pub capabilities: CapabilityRegistry,
    pub admin: Arc<AdminSurface>,
    pub config: AppConfig,
}

impl AppState {
    pub async fn build(args: &ServerArgs, redis_pool: deadpool_redis::Pool) -> anyhow::Result<Self> {
        let keystore = Keystore::new(redis_pool.clone());

        let api_keys = ApiKeys::parse(&args.api_keys.api_keys)?;
        let jwt = JwtConfig {
            jwks_url: args.jwt.jwks_url.clone(),
            issuer: args.jwt.issuer.clone(),
            audience: args.jwt.audience.clone(),
        };
        let auth = Auth::new(keystore.clone(), api_keys, jwt);

        let sessions = SessionRegistry::new(keystore.clone(), args.default_session_ttl_seconds);

        let redis_args: RedisArgs = args.redis.clone();
        let waiters = DirectWaitRegistry::new(
            redis_args.clone(),
            redis_pool.clone(),
            tokio_util::sync::CancellationToken::new(),
        );
        let router = Arc::new(CommandRouter::new(
            keystore.clone(),
            sessions.clone(),
            waiters,
            args.cluster_active_ttl_seconds,
        ));

        let executor_channel = ExecutorChannel::new(
            keystore.clone(),
            redis_args,
            args.executor_active_ttl_seconds,
            args.executor_keepalive_seconds,
        );

        let capabilities = CapabilityRegistry::new(keystore.clone(), args.capability_ttl_seconds);

        let admin = Arc::new(AdminSurface::new(keystore.clone(), auth.clone(), capabilities.clone()));

        Ok(Self {
            keystore,
            auth,
            sessions,
            router,
            executor_channel,
            capabilities,
            admin,
            config: AppConfig {
                execute_requires_api_key: args.execute_requires_api_key,
                default_session_ttl_seconds: args.default_session_ttl_seconds,
                default_command_timeout_seconds: args.default_command_timeout_seconds,
                cluster_active_ttl_seconds: args.cluster_active_ttl_seconds,
            },
        })
    }
}
