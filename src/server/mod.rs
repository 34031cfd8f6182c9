mod handlers;

use anyhow::Result;
use axum::{extract::FromRef, middleware, routing::get, Router};
use airshare_relay::{spawn_router, ws_handler, RelayState, RouterConfig};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;

pub use handlers::static_path;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayState,
    pub static_dir: Option<PathBuf>,
}

impl FromRef<AppState> for RelayState {
    fn from_ref(state: &AppState) -> Self {
        state.relay.clone()
    }
}

pub struct AirshareServer {
    router_config: RouterConfig,
    static_dir: Option<PathBuf>,
    addr: String,
}

impl AirshareServer {
    pub fn new(addr: String) -> Self {
        Self {
            router_config: RouterConfig::default(),
            static_dir: None,
            addr,
        }
    }

    /// Session retention and sweep cadence
    pub fn with_router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    /// Serve the web client from this directory
    pub fn with_static_dir(mut self, dir: PathBuf) -> Self {
        self.static_dir = Some(dir);
        self
    }

    /// Build the HTTP application. Spawns the signaling router, so this
    /// must run inside a tokio runtime.
    pub fn app(&self) -> Router {
        let state = AppState {
            relay: RelayState {
                router: spawn_router(self.router_config.clone()),
            },
            static_dir: self.static_dir.clone(),
        };

        Router::new()
            .route("/", get(handlers::serve_root))
            .route("/ws", get(ws_handler))
            .route("/health", get(handlers::health))
            .route("/session/:id", get(handlers::session_info))
            .fallback(handlers::serve_static)
            .layer(middleware::map_response(handlers::cors))
            .with_state(state)
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until Ctrl+C
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("Listening on {}", listener.local_addr()?);
        if let Some(dir) = &self.static_dir {
            info!("Serving static files from {}", dir.display());
        }

        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    } else {
        // No signal handler available; run until the process is killed
        std::future::pending::<()>().await;
    }
}
