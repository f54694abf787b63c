//! JWT access/refresh token issuance and decoding.

use analytics_error::{AppError, AppResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id, as a string per JWT convention.
    pub sub: String,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// JWT ID — the revocation key.
    pub jti: String,
}

pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: chrono::DateTime<Utc>,
}

fn create_token(user_id: i64, token_type: TokenType, ttl: Duration, secret: &str) -> AppResult<IssuedToken> {
    let jti = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + ttl;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expires_at.timestamp(),
        token_type,
        jti: jti.clone(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::internal("failed to sign token").with_context("cause", e.to_string()))?;
    Ok(IssuedToken {
        token,
        jti,
        expires_at,
    })
}

pub fn create_access_token(user_id: i64, ttl_minutes: i64, secret: &str) -> AppResult<IssuedToken> {
    create_token(user_id, TokenType::Access, Duration::minutes(ttl_minutes), secret)
}

pub fn create_refresh_token(user_id: i64, ttl_days: i64, secret: &str) -> AppResult<IssuedToken> {
    create_token(user_id, TokenType::Refresh, Duration::days(ttl_days), secret)
}

/// Decode and signature/expiry-verify a token. Does not check revocation —
/// callers must separately consult the token store.
pub fn decode_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-at-least-32-bytes-long";

    #[test]
    fn access_token_round_trips() {
        let issued = create_access_token(42, 30, SECRET).unwrap();
        let claims = decode_token(&issued.token, SECRET).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.jti, issued.jti);
    }

    #[test]
    fn refresh_token_has_refresh_type() {
        let issued = create_refresh_token(7, 7, SECRET).unwrap();
        let claims = decode_token(&issued.token, SECRET).unwrap();
        assert_eq!(claims.token_type, TokenType::Refresh);
    }

    #[test]
    fn decode_rejects_wrong_secret() {
        let issued = create_access_token(1, 30, SECRET).unwrap();
        assert!(decode_token(&issued.token, "a-completely-different-secret!!").is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_token("not.a.jwt", SECRET).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued = create_token(1, TokenType::Access, Duration::seconds(-1), SECRET).unwrap();
        assert!(decode_token(&issued.token, SECRET).is_none());
    }

    #[test]
    fn two_tokens_for_the_same_user_have_distinct_jti() {
        let a = create_access_token(1, 30, SECRET).unwrap();
        let b = create_access_token(1, 30, SECRET).unwrap();
        assert_ne!(a.jti, b.jti);
    }
}
