//! `GET /analytics/{project_id}/...`: ownership check via `ProjectRepo`,
//! then delegates to the hybrid query engine.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use analytics_core::{Granularity, OverviewMetrics, Page, SessionSummary, TimeseriesPoint, TopEvent, UserSummary};
use analytics_error::AppError;
use analytics_store::ProjectRepo;

use crate::auth_extractor::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub period: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub granularity: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

const DEFAULT_LIMIT: i64 = 50;

fn resolve_window(q: &AnalyticsQuery) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    if let (Some(start), Some(end)) = (q.start, q.end) {
        if start > end {
            return Err(ApiError(AppError::validation("start must not be after end")));
        }
        return Ok((start, end));
    }

    let span = match q.period.as_deref().unwrap_or("24h") {
        "24h" => Duration::hours(24),
        "7d" => Duration::days(7),
        "30d" => Duration::days(30),
        other => {
            return Err(ApiError(AppError::validation(format!(
                "unknown period '{other}', expected one of 24h, 7d, 30d"
            ))))
        }
    };
    let end = Utc::now();
    Ok((end - span, end))
}

fn resolve_granularity(q: &AnalyticsQuery) -> Result<Granularity, ApiError> {
    match q.granularity.as_deref().unwrap_or("hourly") {
        "hourly" => Ok(Granularity::Hour),
        "daily" => Ok(Granularity::Day),
        other => Err(ApiError(AppError::validation(format!(
            "unknown granularity '{other}', expected hourly or daily"
        )))),
    }
}

async fn check_ownership(state: &AppState, project_id: i64, user_id: i64) -> Result<(), ApiError> {
    ProjectRepo::new(&state.pool).get_owned(project_id, user_id).await?;
    Ok(())
}

pub async fn overview(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
    Query(q): Query<AnalyticsQuery>,
) -> Result<Json<OverviewMetrics>, ApiError> {
    check_ownership(&state, project_id, current_user.user_id).await?;
    let (start, end) = resolve_window(&q)?;
    let metrics = analytics_query::overview(&state.pool, project_id, start, end).await?;
    Ok(Json(metrics))
}

pub async fn timeseries(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
    Query(q): Query<AnalyticsQuery>,
) -> Result<Json<Vec<TimeseriesPoint>>, ApiError> {
    check_ownership(&state, project_id, current_user.user_id).await?;
    let (start, end) = resolve_window(&q)?;
    let granularity = resolve_granularity(&q)?;
    let points = analytics_query::timeseries(&state.pool, project_id, start, end, granularity).await?;
    Ok(Json(points))
}

pub async fn top_events(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
    Query(q): Query<AnalyticsQuery>,
) -> Result<Json<Vec<TopEvent>>, ApiError> {
    check_ownership(&state, project_id, current_user.user_id).await?;
    let (start, end) = resolve_window(&q)?;
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).max(0) as usize;
    let events = analytics_query::top_events(&state.pool, project_id, start, end, limit).await?;
    Ok(Json(events))
}

pub async fn sessions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
    Query(q): Query<AnalyticsQuery>,
) -> Result<Json<Page<SessionSummary>>, ApiError> {
    check_ownership(&state, project_id, current_user.user_id).await?;
    let (start, end) = resolve_window(&q)?;
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = q.offset.unwrap_or(0);
    let page = analytics_query::sessions(&state.pool, project_id, start, end, limit, offset).await?;
    Ok(Json(page))
}

pub async fn users(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
    Query(q): Query<AnalyticsQuery>,
) -> Result<Json<Page<UserSummary>>, ApiError> {
    check_ownership(&state, project_id, current_user.user_id).await?;
    let (start, end) = resolve_window(&q)?;
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = q.offset.unwrap_or(0);
    let page = analytics_query::users(&state.pool, project_id, start, end, limit, offset).await?;
    Ok(Json(page))
}
