//! HTTP/WebSocket API layer.
//!
//! Thin handlers that delegate to the job manager; this module owns router
//! construction and server startup only.

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::job::JobManager;
use crate::state::Config;

pub mod health;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer. Everything here is `Arc`'d or
/// `Copy`, so `AppState` itself is cheaply `Clone` into every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub job_manager: Arc<JobManager>,
    pub config: Arc<Config>,
    pub ws_manager: Arc<WsConnectionManager>,
    pub cancel_token: CancellationToken,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        job_manager: Arc<JobManager>,
        config: Arc<Config>,
        ws_manager: Arc<WsConnectionManager>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            job_manager,
            config,
            ws_manager,
            cancel_token,
            started_at: Instant::now(),
        }
    }

    pub fn from_services(services: &crate::bootstrap::BootstrappedServices) -> Self {
        Self::new(
            Arc::clone(&services.job_manager),
            Arc::clone(&services.config),
            Arc::clone(&services.ws_manager),
            services.cancel_token.clone(),
        )
    }
}

/// Legacy-shaped alias kept for call sites that still spell it out; `new`/
/// `from_services` above are the only constructors this port needs.
pub type AppStateBuilder = AppState;

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Starts the HTTP server on the configured host/port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("server listening on http://{addr}");
    let app = create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
