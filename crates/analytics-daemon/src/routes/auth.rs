//! Account/session surface: register, login, logout, refresh, `/me`, and
//! issuance of the live-socket ticket. Grounded on
//! `original_source/backend/app/api/v1/auth.py`, adapted to the ticket
//! redesign in spec.md §4.7.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use analytics_core::{
    EmailChangeRequest, LoginRequest, RefreshRequest, RegisterRequest, TokenPairResponse,
    UserResponse, WsTicketRequest, WsTicketResponse,
};
use analytics_error::AppError;
use analytics_security::{
    check_account_locked, clear_failed_logins, create_access_token, create_refresh_token,
    decode_token, hash_password, is_refresh_token_revoked, issue_ws_ticket, record_failed_login,
    revoke_all_user_access_tokens, revoke_refresh_token, store_access_token, store_refresh_token,
    verify_password, TokenType,
};
use analytics_store::{ProjectRepo, UserRepo};

use crate::auth_extractor::CurrentUser;
use crate::cookies;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: &'static str,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let users = UserRepo::new(&state.pool);
    if users.get_by_email(&req.email).await?.is_some() {
        return Err(ApiError(AppError::conflict("email already registered")));
    }

    let password_hash = hash_password(&req.password)?;
    let user = users.create(&req.email, &password_hash).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

async fn issue_token_pair(
    state: &AppState,
    user_id: i64,
) -> Result<(String, String), ApiError> {
    let access = create_access_token(user_id, state.config.access_token_expire_minutes, &state.config.jwt_secret)?;
    let refresh = create_refresh_token(user_id, state.config.refresh_token_expire_days, &state.config.jwt_secret)?;

    store_access_token(
        state.kv.as_ref(),
        user_id,
        &access.jti,
        (state.config.access_token_expire_minutes * 60) as u64,
    )
    .await;
    store_refresh_token(
        state.kv.as_ref(),
        user_id,
        &refresh.jti,
        (state.config.refresh_token_expire_days * 24 * 60 * 60) as u64,
    )
    .await;

    Ok((access.token, refresh.token))
}

fn login_cookies(state: &AppState, jar: CookieJar, access: String, refresh: String) -> CookieJar {
    jar.add(cookies::access_token_cookie(&state.config, access))
        .add(cookies::refresh_token_cookie(&state.config, refresh))
        .add(cookies::logged_in_cookie(&state.config))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<TokenPairResponse>), ApiError> {
    let invalid = || ApiError(AppError::unauthorized("invalid email or password"));

    if check_account_locked(state.kv.as_ref(), &req.email).await {
        return Err(invalid());
    }

    let user = UserRepo::new(&state.pool)
        .get_by_email(&req.email)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash) {
        record_failed_login(state.kv.as_ref(), &req.email).await;
        return Err(invalid());
    }

    if !user.is_active {
        return Err(invalid());
    }

    clear_failed_logins(state.kv.as_ref(), &req.email).await;

    let (access_token, refresh_token) = issue_token_pair(&state, user.id).await?;
    let jar = login_cookies(&state, jar, access_token.clone(), refresh_token.clone());

    Ok((
        jar,
        Json(TokenPairResponse {
            access_token,
            refresh_token,
            token_type: "bearer",
        }),
    ))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RefreshRequest>,
) -> Result<(CookieJar, Json<TokenPairResponse>), ApiError> {
    let invalid = || ApiError(AppError::unauthorized("invalid refresh token"));

    let claims = decode_token(&req.refresh_token, &state.config.jwt_secret).ok_or_else(invalid)?;
    if claims.token_type != TokenType::Refresh {
        return Err(invalid());
    }
    if is_refresh_token_revoked(state.kv.as_ref(), &claims.jti).await {
        return Err(invalid());
    }
    let user_id: i64 = claims.sub.parse().map_err(|_| invalid())?;

    let user = UserRepo::new(&state.pool)
        .get_by_id(user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(invalid)?;

    revoke_refresh_token(state.kv.as_ref(), user.id, &claims.jti).await;
    revoke_all_user_access_tokens(state.kv.as_ref(), user.id).await;

    let (access_token, refresh_token) = issue_token_pair(&state, user.id).await?;
    let jar = login_cookies(&state, jar, access_token.clone(), refresh_token.clone());

    Ok((
        jar,
        Json(TokenPairResponse {
            access_token,
            refresh_token,
            token_type: "bearer",
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LogoutRequest>,
) -> Result<(CookieJar, Json<LogoutResponse>), ApiError> {
    let invalid = || ApiError(AppError::unauthorized("invalid refresh token"));
    let claims = decode_token(&req.refresh_token, &state.config.jwt_secret).ok_or_else(invalid)?;
    if claims.token_type != TokenType::Refresh {
        return Err(invalid());
    }
    let user_id: i64 = claims.sub.parse().map_err(|_| invalid())?;

    revoke_refresh_token(state.kv.as_ref(), user_id, &claims.jti).await;
    revoke_all_user_access_tokens(state.kv.as_ref(), user_id).await;

    let mut jar = jar;
    for cookie in cookies::clear_cookies(&state.config) {
        jar = jar.add(cookie);
    }

    Ok((
        jar,
        Json(LogoutResponse {
            message: "successfully logged out",
        }),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user = UserRepo::new(&state.pool)
        .get_by_id(current_user.user_id)
        .await?
        .ok_or_else(|| ApiError(AppError::unauthorized("user not found")))?;
    Ok(Json(UserResponse::from(&user)))
}

/// `service.update_email` in the original: the unique-constraint on `email`
/// does the real conflict check, this just surfaces it as 409.
pub async fn update_email(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(req): Json<EmailChangeRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = UserRepo::new(&state.pool)
        .update_email(current_user.user_id, &req.email)
        .await?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn ws_ticket(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(req): Json<WsTicketRequest>,
) -> Result<Json<WsTicketResponse>, ApiError> {
    ProjectRepo::new(&state.pool)
        .get_owned(req.project_id, current_user.user_id)
        .await?;

    let ticket = issue_ws_ticket(
        state.kv.as_ref(),
        req.project_id,
        current_user.user_id,
        state.config.ws_ticket_ttl_seconds,
    )
    .await?;

    Ok(Json(WsTicketResponse {
        ticket,
        expires_in_seconds: state.config.ws_ticket_ttl_seconds,
    }))
}
