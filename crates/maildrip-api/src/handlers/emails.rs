//! Handlers for batch submission and message operations.
//!
//! Thin shells over [`BatchScheduler`]: extract the owner header, parse
//! parameters, delegate, and map the result. Foreign-owner reads come back
//! as 404, never 403, so ids leak nothing about other owners' messages.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use maildrip_core::{BatchRequest, MessageId, MessageStatus, OwnerId};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::{error::ApiError, server::AppState};

/// Extracts the caller identity stamped by the upstream proxy.
fn owner_from(headers: &HeaderMap) -> Result<OwnerId, ApiError> {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(OwnerId::from)
        .ok_or(ApiError::MissingOwner)
}

#[derive(Debug, Serialize)]
struct ScheduleResponse {
    message: &'static str,
    count: usize,
}

/// `POST /api/emails/schedule` — submits a batch.
#[instrument(skip(state, headers, request), fields(recipients = request.recipients.len()))]
pub async fn schedule_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> Response {
    let owner = match owner_from(&headers) {
        Ok(owner) => owner,
        Err(err) => return err.into_response(),
    };

    match state.scheduler.submit(owner, request).await {
        Ok(receipt) => (
            StatusCode::CREATED,
            Json(ScheduleResponse {
                message: "emails scheduled successfully",
                count: receipt.scheduled_count,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Query parameters for listing messages.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Optional status filter (`scheduled`, `processing`, ...).
    pub status: Option<String>,
}

/// `GET /api/emails` — lists the owner's messages.
pub async fn list_emails(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let owner = match owner_from(&headers) {
        Ok(owner) => owner,
        Err(err) => return err.into_response(),
    };

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match MessageStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return ApiError::Validation(maildrip_core::ValidationError {
                    field: "status",
                    message: format!("unknown status: {raw}"),
                })
                .into_response()
            },
        },
    };

    match state.scheduler.list(owner, status).await {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /api/emails/stats` — scheduled/sent/failed counts.
pub async fn owner_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let owner = match owner_from(&headers) {
        Ok(owner) => owner,
        Err(err) => return err.into_response(),
    };
    match state.scheduler.stats(owner).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /api/emails/{id}` — one message.
pub async fn get_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let owner = match owner_from(&headers) {
        Ok(owner) => owner,
        Err(err) => return err.into_response(),
    };
    match state.scheduler.get(owner, MessageId::from(id)).await {
        Ok(message) => Json(message).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `POST /api/emails/{id}/cancel` — cancels a scheduled message.
pub async fn cancel_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let owner = match owner_from(&headers) {
        Ok(owner) => owner,
        Err(err) => return err.into_response(),
    };
    match state.scheduler.cancel(owner, MessageId::from(id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

/// `DELETE /api/emails/{id}` — removes a message entirely.
pub async fn delete_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let owner = match owner_from(&headers) {
        Ok(owner) => owner,
        Err(err) => return err.into_response(),
    };
    match state.scheduler.delete(owner, MessageId::from(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
