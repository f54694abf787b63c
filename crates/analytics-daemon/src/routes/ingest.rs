//! `POST /events/ingest`: resolves the project from `X-API-Key`, hashes the
//! caller's IP, and hands the batch to the ingest coordinator.

use axum::extract::{ConnectInfo, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use analytics_core::IncomingEvent;
use analytics_error::AppError;
use analytics_security::hash_ip;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub events: Vec<IncomingEvent>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

fn client_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next().map(str::trim) {
                if !first.is_empty() {
                    return Some(first.to_owned());
                }
            }
        }
    }
    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

pub async fn ingest_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(AppError::unauthorized("missing X-API-Key")))?;

    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    let ip_hash = client_ip(&headers, connect_info).map(|ip| hash_ip(&ip, &state.config.jwt_secret));

    let project = analytics_ingest::resolve_project(&state.pool, api_key).await?;

    let accepted = analytics_ingest::ingest(
        state.buffer.as_ref(),
        &state.pool,
        project.id,
        payload.events,
        ip_hash,
        user_agent,
    )
    .await?;

    Ok(Json(IngestResponse { accepted }))
}
