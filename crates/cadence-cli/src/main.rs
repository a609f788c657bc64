//! `cadence` binary: REST server, job worker, and status queries.

mod config;
mod engine;

use crate::config::CadenceConfig;
use crate::engine::Engine;
use cadence_gateway::{AuthConfig, GatewayServer};
use cadence_security::RateLimiter;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence", about = "Cadence: three-round email campaign orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cadence.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API and the job runner
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Serve the API without running lifecycle jobs
        #[arg(long)]
        no_runner: bool,
    },
    /// Run lifecycle jobs only
    Worker,
    /// Print a campaign's status as JSON
    Status {
        /// Campaign name
        campaign: String,
    },
}

/// Flip the shutdown flag on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = CadenceConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_runner,
        } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let engine = Engine::build(&config).await?;
            let shutdown = shutdown_signal();

            let runner_task = if no_runner {
                None
            } else {
                Some(tokio::spawn(engine.runner(&config).run(shutdown.clone())))
            };

            let rate_limiter = Arc::new(RateLimiter::new(
                config.security.max_burst,
                config.security.max_requests_per_second,
            ));
            let idle = Duration::from_secs(config.security.idle_client_secs.max(1));
            let pruner = rate_limiter.spawn_pruner(idle.min(Duration::from_secs(60)), idle);
            let auth_config = AuthConfig::new(config.security.api_keys.clone());
            if auth_config.is_enabled() {
                info!(keys = config.security.api_keys.len(), "API key auth enabled");
            }
            let app = GatewayServer::build_with_middleware(
                engine.app_state(),
                Some(rate_limiter),
                auth_config,
            );

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Cadence listening on {}", addr);

            let mut stop = shutdown;
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop.wait_for(|done| *done).await;
            })
            .await?;
            pruner.abort();

            if let Some(task) = runner_task {
                task.await?;
            }
        }
        Commands::Worker => {
            let engine = Engine::build(&config).await?;
            info!("Cadence worker started");
            engine.runner(&config).run(shutdown_signal()).await;
        }
        Commands::Status { campaign } => {
            let engine = Engine::build(&config).await?;
            let status = engine.status.get_campaign_status(&campaign).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
