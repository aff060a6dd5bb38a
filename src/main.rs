//! fin-server
//!
//! HTTP front of the banking API, with graceful shutdown.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ net::listener (DrainingListener) ──▶ http::server (HttpServer) ──▶ Router
//!                      │                                     ▲
//!                      ▼                                     │ keep-alive off
//!              net::tracker (open count, drained)   lifecycle::manager ◀── SIGINT/SIGTERM
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use axum::{routing::get, Json, Router};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use fin_server::config::{self, ObservabilityConfig};
use fin_server::lifecycle::{signals, ServerLifecycleManager, Shutdown, ShutdownOutcome};
use fin_server::observability;

#[derive(Parser)]
#[command(name = "fin-server")]
#[command(about = "Financial Go (Banking) API HTTP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server until SIGINT/SIGTERM
    Serve {
        /// Path to a TOML config file (FIN_GO_* environment variables override it)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => serve(config).await,
    }
}

async fn serve(config_path: Option<PathBuf>) -> ExitCode {
    let config = match config::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            observability::logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    observability::logging::init_logging(&config.observability);

    tracing::info!(
        bind_address = %config.listener.bind_address(),
        max_conns_per_ip = config.http.max_conns_per_ip,
        max_requests_per_conn = config.http.max_requests_per_conn,
        concurrency = config.http.concurrency,
        keep_alive = ?config.http.keep_alive(),
        shutdown_max_wait = ?config.shutdown.max_wait(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = observability::metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    signals::forward_to(shutdown.clone());

    let manager = ServerLifecycleManager::new(config, app());
    let code = match manager.run(shutdown.subscribe()).await {
        Ok(ShutdownOutcome::Drained) => ExitCode::SUCCESS,
        // Reported by the manager; the process still exits normally.
        Ok(ShutdownOutcome::DrainTimedOut(_)) => ExitCode::SUCCESS,
        Ok(ShutdownOutcome::CloseFailed(_)) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "Server terminated abnormally");
            ExitCode::FAILURE
        }
    };

    tracing::info!("Shutdown complete");
    code
}

/// Application routes. Business handlers plug in here.
fn app() -> Router {
    Router::new()
        .route("/", get(|| async {}))
        .route("/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
