use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use analytics_error::AppError;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Pings Postgres and Redis with a short timeout; either failing surfaces
/// as `ServiceUnavailable`, matching spec.md §7's readiness-probe kind.
pub async fn ready(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    analytics_store::ping(&state.pool)
        .await
        .map_err(|_| ApiError(AppError::service_unavailable("database not ready")))?;

    state
        .kv
        .exists("__readiness_probe__")
        .await
        .map_err(|_| ApiError(AppError::service_unavailable("redis not ready")))?;

    Ok(Json(json!({ "status": "ready" })))
}
