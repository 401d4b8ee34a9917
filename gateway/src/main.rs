mod admin;
mod args;
mod audit;
mod auth;
mod capability;
mod error;
mod executor_channel;
mod handlers;
mod keystore;
mod middleware;
mod models;
mod router;
mod server;
mod session;
mod state;

use clap::Parser;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gateway_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server(args) => {
            gateway_common::metrics::maybe_spawn_metrics_server();
            server::run_server(args).await
        }
    }
}
