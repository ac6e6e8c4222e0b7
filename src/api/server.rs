//! API Server
//!
//! Serves a control router on the control port until shutdown.

use crate::domain::ports::CONTROL_PORT;
use crate::error::{Error, Result};
use axum::Router;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub bind_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), CONTROL_PORT),
        }
    }
}

/// REST API server for one router
pub struct ApiServer {
    config: ApiServerConfig,
    shutdown: CancellationToken,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self, router: Router) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                Error::Configuration(format!(
                    "Failed to bind REST server on {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        serve(listener, router, self.shutdown.clone()).await
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Serve a router on an already bound listener
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("REST API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("REST server on {} shutting down", addr);
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}
