//! Library surface for `ui-server`: the binary in `main.rs` is a thin
//! shell over [`spawn`], kept separate so integration tests can drive a
//! full in-process instance the same way, without shelling out to a
//! built binary — the split the teacher uses between its `server`
//! binary and the logic test harnesses link against directly.

pub mod app;
pub mod backend_socket;
pub mod cli;
pub mod http_routes;
pub mod push;
pub mod session;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::info;

use uiconfig::Config;
use uistorage::Store;

use app::AppState;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to bind backend socket: {0}")]
    Backend(#[from] uinet::NetError),
    #[error("failed to bind HTTP listener: {0}")]
    Http(#[source] std::io::Error),
}

/// Builds the frontend axum router: session vending, the SPA/site
/// fallback, the WebSocket upgrade, and the long-poll drain.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(http_routes::root_handler))
        .route("/healthz", get(http_routes::healthz))
        .route("/ws/{vended_id}", get(ws::ws_handler))
        .route("/poll/{vended_id}", get(ws::poll_handler))
        .fallback(http_routes::site_fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running instance: the bound HTTP address plus a handle to shut it
/// down. Dropping this without calling [`ServerHandle::shutdown`] leaves
/// the background tasks running, same as dropping a `JoinHandle` does.
pub struct ServerHandle {
    pub http_addr: std::net::SocketAddr,
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ServerHandle {
    /// Signals the HTTP listener to stop accepting and finish in-flight
    /// requests. The backend-socket accept loop and any per-connection
    /// tasks it spawned are left to exit on their own as sessions close.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Binds the frontend HTTP listener and the backend Unix socket and
/// spawns both serving loops in the background, returning as soon as
/// the HTTP listener is bound. Used by the `serve` binary subcommand and
/// by integration tests that want a full instance to connect to.
pub async fn spawn(config: Config, store: Arc<dyn Store>) -> Result<ServerHandle, SpawnError> {
    let state = AppState::new(config, store);
    app::spawn_session_reaper(state.clone());

    let backend_addr = uinet::BackendAddr::Unix(state.config.socket_path.clone());
    let listener = uinet::BackendListener::bind(&backend_addr)?;
    {
        let state = state.clone();
        tokio::spawn(async move {
            backend_socket::run(listener, state).await;
        });
    }

    let router = build_router(state.clone());
    let bind_addr = format!("{}:{}", state.config.host, state.config.port);
    let tcp_listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(SpawnError::Http)?;
    let http_addr = tcp_listener.local_addr().map_err(SpawnError::Http)?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    info!(addr = %http_addr, "ui-server listening");
    Ok(ServerHandle {
        http_addr,
        state,
        shutdown: Some(shutdown_tx),
    })
}
