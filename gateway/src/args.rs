use clap::{Parser, Subcommand};
use gateway_common::args::{RateLimiterArgs, RedisArgs};

#[derive(Parser, Debug)]
#[command(name = "debug-gateway", version, about = "Multi-cluster Kubernetes debugging gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server.
    Server(ServerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    #[arg(long, env = "BIND_PORT", default_value_t = 8080)]
    pub bind_port: u16,

    #[command(flatten)]
    pub redis: RedisArgs,

    #[command(flatten)]
    pub rate_limiter: RateLimiterArgs,

    #[command(flatten)]
    pub api_keys: ApiKeysArgs,

    #[command(flatten)]
    pub jwt: JwtArgs,

    /// Require an API key (not a bearer token) for /debug/execute specifically,
    /// mirroring the asymmetric credential requirement some deployments expect.
    #[arg(long, env = "EXECUTE_REQUIRES_API_KEY", default_value_t = false)]
    pub execute_requires_api_key: bool,

    #[arg(long, env = "DEFAULT_SESSION_TTL_SECONDS", default_value_t = 300)]
    pub default_session_ttl_seconds: u64,

    #[arg(long, env = "DEFAULT_COMMAND_TIMEOUT_SECONDS", default_value_t = 10)]
    pub default_command_timeout_seconds: u64,

    #[arg(long, env = "CLUSTER_ACTIVE_TTL_SECONDS", default_value_t = 60)]
    pub cluster_active_ttl_seconds: u64,

    #[arg(long, env = "EXECUTOR_ACTIVE_TTL_SECONDS", default_value_t = 90)]
    pub executor_active_ttl_seconds: u64,

    #[arg(long, env = "CAPABILITY_TTL_SECONDS", default_value_t = 3600)]
    pub capability_ttl_seconds: u64,

    #[arg(long, env = "EXECUTOR_KEEPALIVE_SECONDS", default_value_t = 30)]
    pub executor_keepalive_seconds: u64,

    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

#[derive(Parser, Debug, Clone)]
pub struct ApiKeysArgs {
    /// Comma-separated list of accepted API keys. Each entry may be a bare
    /// key or `service:key`, where `service` becomes that key's identity.
    #[arg(long, env = "API_KEYS", required = true, value_delimiter = ',')]
    pub api_keys: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct JwtArgs {
    /// JWKS URL for validating bearer tokens. If unset, the `jwt` auth
    /// method is disabled and only API keys are accepted.
    #[arg(long, env = "JWT_JWKS_URL")]
    pub jwks_url: Option<String>,

    #[arg(long, env = "JWT_ISSUER")]
    pub issuer: Option<String>,

    #[arg(long, env = "JWT_AUDIENCE")]
    pub audience: Option<String>,
}
