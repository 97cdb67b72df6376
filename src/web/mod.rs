//! Web layer
//!
//! A single fallback route serves manifests; `/health` is the only fixed
//! route. Request spans come from `tower-http`'s `TraceLayer`.

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{config::Config, services::ManifestService};

pub mod handlers;
pub mod responses;

pub use responses::{handle_error, ErrorResponse, HealthResponse};

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, manifests: ManifestService) -> Result<Self> {
        let app = Self::create_router(AppState {
            manifests: Arc::new(manifests),
        });
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        Ok(Self { app, addr })
    }

    /// Create the router with all routes and middleware
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .fallback(handlers::serve_manifest)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the web server
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub manifests: Arc<ManifestService>,
}
