//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio::net::TcpListener;

use super::middleware;
use super::routes::{health, interop};
use crate::core::ShutdownService;
use crate::core::config::ServerConfig;
use crate::core::constants::API_MAX_BODY_BYTES;
use crate::data::TraceStore;
use crate::domain::interop::InteropService;

pub struct ApiServer {
    addr: SocketAddr,
    service: Arc<InteropService>,
    store: Arc<TraceStore>,
    shutdown: ShutdownService,
}

impl ApiServer {
    pub fn new(
        config: &ServerConfig,
        service: Arc<InteropService>,
        store: Arc<TraceStore>,
        shutdown: ShutdownService,
    ) -> Result<Self> {
        let addr = SocketAddr::new(config.host.parse()?, config.port);
        Ok(Self {
            addr,
            service,
            store,
            shutdown,
        })
    }

    pub fn router(service: Arc<InteropService>, store: Arc<TraceStore>) -> Router {
        Router::new()
            .route("/api/v1/health", get(health::health))
            .nest("/api/v1", interop::routes(service, store))
            .fallback(middleware::handle_404)
            .layer(middleware::cors())
            .layer(middleware::trace())
            .layer(DefaultBodyLimit::max(API_MAX_BODY_BYTES))
    }

    /// Serve until shutdown is triggered
    pub async fn start(self) -> Result<()> {
        let router = Self::router(self.service, self.store);

        let listener = TcpListener::bind(self.addr).await?;
        tracing::debug!(addr = %self.addr, "Starting HTTP API server");
        axum::serve(listener, router)
            .with_graceful_shutdown(self.shutdown.wait())
            .await?;

        Ok(())
    }
}
