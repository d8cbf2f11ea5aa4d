//! Internal instance-to-instance endpoints
//!
//! `POST /internal/events` receives messages forwarded by the peer under the
//! forward-with-fallback delivery strategy and runs them through the local
//! router. Access requires the internal request header; everything else is
//! rejected before touching the body.
//!
//! `POST /admin/stand-down` is the explicit operator signal that takes a
//! consuming instance out of rotation — the only sanctioned path back from
//! a promotion.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::failover::forward::{INTERNAL_REQUEST_HEADER, SOURCE_CONTAINER_HEADER};
use crate::kafka::MessageEnvelope;

/// Receive a forwarded message from the peer instance
pub async fn receive_forwarded(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MessageEnvelope>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let is_internal = headers
        .get(INTERNAL_REQUEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == "true");

    if !is_internal {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "success": false,
                "message": "Access denied - internal API only",
            })),
        )
            .into_response();
    }

    let source = headers
        .get(SOURCE_CONTAINER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    info!(source, "Internal request received");

    let envelope = match body {
        Ok(Json(envelope)) => envelope,
        Err(e) => {
            warn!(error = %e, "Rejected malformed forwarded message");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "message": format!("Invalid message envelope: {}", e),
                })),
            )
                .into_response();
        },
    };

    let outcome = state.router.route(&envelope).await;

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "outcome": outcome,
        })),
    )
        .into_response()
}

/// Operator signal: stop consuming on this instance
pub async fn stand_down(State(state): State<AppState>) -> Response {
    match state.role.stand_down().await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Instance stood down; restart it to resume its configured role",
            })),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "message": "Instance is not consuming; nothing to stand down",
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
