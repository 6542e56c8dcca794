//! HTTP server fronted by the rate limit gate.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;
use crate::gate::{Gate, RateLimitLayer};

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct Status {
    service: &'static str,
    version: &'static str,
    rate_limiting_enabled: bool,
    enforce_burst: bool,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn status(State(gate): State<Arc<Gate>>) -> Json<Status> {
    Json(Status {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        rate_limiting_enabled: gate.limiter().is_enabled(),
        enforce_burst: gate.settings().enforce_burst,
    })
}

/// Build the service router with every route behind the gate.
pub fn router(gate: Arc<Gate>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .with_state(gate.clone())
        .layer(RateLimitLayer::new(gate))
}

/// HTTP server for the gated routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    gate: Arc<Gate>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, gate: Arc<Gate>) -> Self {
        Self { addr, gate }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server stops accepting connections when the provided signal resolves
    /// and returns once in-flight requests have completed.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(addr = %self.addr, "Starting HTTP server");

        let app = router(self.gate);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
