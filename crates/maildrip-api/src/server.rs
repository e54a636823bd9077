//! HTTP server setup and routing.
//!
//! A thin axum shell over the scheduler: tracing and timeout middleware,
//! health probes, and the email routes. The `/api/emails/stats` route is
//! registered before `/api/emails/{id}` so "stats" never parses as an id.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use maildrip_core::MessageStore;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{handlers, scheduler::BatchScheduler};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The batch scheduling service.
    pub scheduler: Arc<BatchScheduler>,
    /// Message store, used directly by the readiness probe.
    pub store: Arc<dyn MessageStore>,
}

/// Builds the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health/live", get(handlers::liveness_check))
        .route("/health/ready", get(handlers::readiness_check));

    let email_routes = Router::new()
        .route("/api/emails/schedule", post(handlers::schedule_batch))
        .route("/api/emails", get(handlers::list_emails))
        .route("/api/emails/stats", get(handlers::owner_stats))
        .route("/api/emails/{id}", get(handlers::get_email).delete(handlers::delete_email))
        .route("/api/emails/{id}/cancel", post(handlers::cancel_email));

    Router::new()
        .merge(health_routes)
        .merge(email_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves until the process is asked to stop.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn start_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
