//! Resolves the authenticated user from either a bearer `Authorization`
//! header or the `access_token` cookie, matching the original's dual
//! OAuth2-bearer/cookie support.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use analytics_error::AppError;
use analytics_security::{decode_token, is_access_token_revoked, TokenType};

use crate::error::ApiError;
use crate::state::AppState;

pub struct CurrentUser {
    pub user_id: i64,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_owned)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, app_state: &AppState) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(parts) {
            Some(t) => Some(t),
            None => {
                let jar = CookieJar::from_headers(&parts.headers);
                jar.get("access_token").map(|c| c.value().to_owned())
            }
        }
        .ok_or_else(|| ApiError(AppError::unauthorized("missing credentials")))?;

        let claims = decode_token(&token, &app_state.config.jwt_secret)
            .ok_or_else(|| ApiError(AppError::unauthorized("invalid token")))?;

        if claims.token_type != TokenType::Access {
            return Err(ApiError(AppError::unauthorized("invalid token type")));
        }

        if is_access_token_revoked(app_state.kv.as_ref(), &claims.jti).await {
            return Err(ApiError(AppError::unauthorized("token has been revoked")));
        }

        let user_id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| ApiError(AppError::unauthorized("invalid token subject")))?;

        Ok(CurrentUser { user_id })
    }
}
