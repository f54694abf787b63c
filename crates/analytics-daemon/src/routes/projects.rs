//! Project CRUD and API-key rotation. Grounded on
//! `original_source/backend/app/api/v1/projects.py`; every route resolves
//! the project through `ProjectRepo::get_owned` so one user can never act
//! on another user's project.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use analytics_core::{generate_api_key, ProjectCreateRequest, ProjectCreateResponse, ProjectResponse, ProjectUpdateRequest};
use analytics_store::ProjectRepo;

use crate::auth_extractor::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_project(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(req): Json<ProjectCreateRequest>,
) -> Result<(StatusCode, Json<ProjectCreateResponse>), ApiError> {
    let generated = generate_api_key();
    let project = ProjectRepo::new(&state.pool)
        .create(
            current_user.user_id,
            &req.name,
            req.domain.as_deref(),
            &generated.key_hash,
            &generated.key_prefix,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ProjectCreateResponse {
            project: ProjectResponse::from(&project),
            api_key: generated.plaintext,
        }),
    ))
}

pub async fn list_projects(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<Vec<ProjectResponse>>, ApiError> {
    let projects = ProjectRepo::new(&state.pool)
        .list_for_user(current_user.user_id)
        .await?;
    Ok(Json(projects.iter().map(ProjectResponse::from).collect()))
}

pub async fn get_project(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = ProjectRepo::new(&state.pool)
        .get_owned(project_id, current_user.user_id)
        .await?;
    Ok(Json(ProjectResponse::from(&project)))
}

/// `domain` is absent or `null` to leave it unchanged, empty string to
/// clear it, non-empty to set it.
pub async fn update_project(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
    Json(req): Json<ProjectUpdateRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let domain_update = req.domain.as_deref().map(|d| if d.is_empty() { None } else { Some(d) });

    let project = ProjectRepo::new(&state.pool)
        .update(project_id, current_user.user_id, req.name.as_deref(), domain_update)
        .await?;
    Ok(Json(ProjectResponse::from(&project)))
}

pub async fn rotate_key(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<Json<ProjectCreateResponse>, ApiError> {
    let generated = generate_api_key();
    let project = ProjectRepo::new(&state.pool)
        .rotate_key(project_id, current_user.user_id, &generated.key_hash, &generated.key_prefix)
        .await?;

    Ok(Json(ProjectCreateResponse {
        project: ProjectResponse::from(&project),
        api_key: generated.plaintext,
    }))
}

pub async fn delete_project(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ProjectRepo::new(&state.pool)
        .delete(project_id, current_user.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
