//! Health and role endpoints
//!
//! `GET /health` is the liveness contract of the failover pair: the standby
//! probes it and counts any non-200 answer, connection error, or timeout as
//! a failure. It answers 200 whenever the process is serving requests; the
//! per-service map is informational and does not gate the status code.

use std::collections::HashMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use super::{AppState, HealthResponse, RoleResponse};
use crate::db::pool;

/// Liveness endpoint probed by the peer instance
pub async fn health_check(State(state): State<AppState>) -> Response {
    let mut services = HashMap::new();

    match pool::health_check(&state.pool).await {
        Ok(()) => {
            services.insert("database".to_string(), "active".to_string());
        },
        Err(e) => {
            tracing::warn!(error = %e, "Database unreachable during health check");
            services.insert("database".to_string(), "error".to_string());
        },
    }

    let role_state = state.role.state().await;
    services.insert(
        "consumer".to_string(),
        if role_state.is_consuming() {
            "consuming".to_string()
        } else {
            "standby".to_string()
        },
    );

    let response = HealthResponse {
        success: true,
        container: state.role.container_role().to_string(),
        services,
        timestamp: Utc::now(),
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Role introspection for operators
pub async fn role_state(State(state): State<AppState>) -> Response {
    let role_state = state.role.state().await;

    let response = RoleResponse {
        container: state.role.container_role().to_string(),
        state: role_state,
        consuming: role_state.is_consuming(),
        dedup_cache_size: state.router.guard().len(),
    };

    (StatusCode::OK, Json(response)).into_response()
}
