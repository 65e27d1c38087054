//! HTTP control and streaming surface.
//!
//! Serves the viewer page, JPEG snapshots, an MJPEG stream, the session
//! controls and Prometheus metrics. Shutdown is graceful and triggered
//! through [`AppState::request_shutdown`], by `/stop` or by the binary on
//! Ctrl-C.

mod routes;
mod state;

pub use routes::router;
pub use state::{AppState, StopSummary};

use std::sync::Arc;

use thiserror::Error;
use tower_http::cors::CorsLayer;

/// Errors that can occur while serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(String),
}

/// HTTP server over a shared [`AppState`].
#[derive(Debug)]
pub struct StreamServer {
    state: Arc<AppState>,
}

impl StreamServer {
    /// Creates a server for the given state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Binds the configured address and serves until shutdown is requested.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.state.config().server.bind_addr();
        let app = router(Arc::clone(&self.state)).layer(CorsLayer::permissive());

        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!(
            addr = %addr,
            source = %self.state.source().locator(),
            "Server listening"
        );

        let mut shutdown = self.state.subscribe_shutdown();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                // A dropped sender also ends the wait.
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| ServerError::Server(e.to_string()))?;

        tracing::info!("Server stopped");
        Ok(())
    }
}
