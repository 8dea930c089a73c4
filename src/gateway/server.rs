//! Gateway server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// API gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared request-pipeline state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// # Errors
    ///
    /// Returns an error if the JWT secret is missing or a backend is misconfigured.
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(AppState::from_config(&config)?);
        Ok(Self { config, state })
    }

    /// Bind the configured address and serve until a shutdown signal.
    ///
    /// In-flight requests get `server.shutdown_timeout` to finish after the
    /// signal; whatever is still open then is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let mut drain_rx = shutdown_tx.subscribe();

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("API GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(user = %self.config.upstreams.user, "  user service");
        info!(file = %self.config.upstreams.file, "  file service");
        info!(analytics = %self.config.upstreams.analytics, "  analytics service");
        info!(routes = self.state.routes.len(), "Routes registered");
        info!("============================================================");

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .into_future();

        let drain_window = self.config.server.shutdown_timeout;
        let drain_deadline = async move {
            let _ = drain_rx.recv().await;
            tokio::time::sleep(drain_window).await;
        };

        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = drain_deadline => {
                warn!(timeout = ?drain_window, "Shutdown timeout elapsed, dropping open connections");
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight requests");
    let _ = shutdown_tx.send(());
}
