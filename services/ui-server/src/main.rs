//! `ui-server`: the UI server binary. `ui-server serve` (the default
//! when no subcommand is given) runs the frontend HTTP/WebSocket
//! listener and the backend Unix socket side by side; the other
//! subcommands are one-shot CLI clients speaking the same backend
//! protocol, or bundle-management utilities, structured the way the
//! teacher splits a long-running service from its CLI tooling.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use uiconfig::{Config, StorageBackend};
use uistorage::{MemoryStore, SqliteStore, Store};

use ui_server::cli::{self, Cli, Command};

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command.unwrap_or(Command::Serve(cli::ServeArgs::default())) {
        Command::Serve(args) => {
            serve(args).await;
            0
        }
        other => cli::dispatch(other).await,
    };
    std::process::exit(exit_code);
}

async fn serve(args: cli::ServeArgs) {
    let overrides = args.to_overrides();
    let config = match uiconfig::load(args.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let store: Arc<dyn Store> = match &config.storage_backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite(path) => match SqliteStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "failed to open sqlite store");
                std::process::exit(2);
            }
        },
        StorageBackend::Postgres(_) => {
            // This binary is built without the `postgres` feature on
            // uistorage — see DESIGN.md for why that backend isn't
            // wired in here yet.
            tracing::error!("postgres storage backend is not compiled into this binary");
            std::process::exit(2);
        }
    };

    run_server(config, store).await;
}

async fn run_server(config: Config, store: Arc<dyn Store>) {
    let handle = match ui_server::spawn(config, store).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    shutdown_signal().await;
    handle.shutdown();
    info!("ui-server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
