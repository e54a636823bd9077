//! Liveness and readiness probes.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::server::AppState;

/// `GET /health/live` — the process is up.
pub async fn liveness_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// `GET /health/ready` — the message store answers a round-trip.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "error": err.to_string()})),
        ),
    }
}
