//! shellgate-server: interactive shell gateway.
//!
//! Opens SSH PTY sessions on behalf of browser clients and streams them
//! over STOMP on a WebSocket; sessions are created through a small REST API.

mod bus;
mod config;
mod http;
mod relay;
mod server;
mod session;
mod shell;
mod ssh;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::ShellGateway;
use std::path::PathBuf;
use tracing::{error, info};

/// shellgate-server: SSH shells over STOMP/WebSocket
#[derive(Parser, Debug)]
#[command(name = "shellgate-server", version, about = "Interactive shell gateway")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.shellgate/config.toml")]
    config: String,

    /// HTTP API port
    #[arg(long)]
    http_port: Option<u16>,

    /// STOMP WebSocket port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Session time-to-live in minutes
    #[arg(long)]
    session_ttl: Option<u64>,

    /// Expiry sweep period in seconds
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// SQLite URL for the audit store (in-memory store when unset)
    #[arg(long)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting shellgate-server");

    let overrides = CliOverrides {
        http_port: cli.http_port,
        ws_port: cli.ws_port,
        session_ttl_minutes: cli.session_ttl,
        sweep_interval_secs: cli.sweep_interval,
        database_url: cli.database_url,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let gateway = match ShellGateway::new(server_config).await {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "failed to create gateway");
            std::process::exit(1);
        }
    };
    let manager = gateway.manager();

    let mut exit_code = 0;
    tokio::select! {
        result = gateway.run() => {
            if let Err(e) = result {
                error!(error = %e, "gateway error");
                exit_code = 1;
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!(live = manager.live_count(), "closing live sessions");
    manager.close_all().await;
    info!("shellgate-server stopped");
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
