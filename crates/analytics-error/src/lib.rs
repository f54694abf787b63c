//! Unified error taxonomy for the analytics backend.
//!
//! Every fallible operation in this workspace returns `Result<T, AppError>`.
//! `AppError` carries a stable [`ErrorKind`] that maps to exactly one HTTP
//! status code, so the mapping from domain error to wire response lives in
//! one place ([`ErrorKind::http_status`]) instead of being re-derived at
//! every call site.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The stable, machine-readable error kinds this service can return.
///
/// Variants are intentionally coarse — they describe the caller-visible
/// outcome, not the internal cause. `Display` renders the
/// `SCREAMING_SNAKE_CASE` wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Missing or invalid credentials. Never discloses which factor failed.
    Unauthorized,
    /// Authenticated but not permitted to act on this resource.
    Forbidden,
    /// Resource does not exist, or exists but belongs to another tenant.
    NotFound,
    /// The request conflicts with existing state (e.g. duplicate email).
    Conflict,
    /// The request body or parameters failed validation.
    Validation,
    /// The caller has exceeded an enforced rate limit.
    RateLimited,
    /// A required downstream dependency is unavailable.
    ServiceUnavailable,
    /// An unexpected internal failure. Never leaks internal detail to callers.
    Internal,
}

impl ErrorKind {
    /// The HTTP status code this kind maps to.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Validation => 422,
            ErrorKind::RateLimited => 429,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// The stable wire code, e.g. `"NOT_FOUND"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An application-level error: a stable [`ErrorKind`], a caller-safe
/// message, optional structured context for logging, and an optional
/// opaque source error for `Display`/`source()` chaining.
pub struct AppError {
    kind: ErrorKind,
    message: String,
    context: BTreeMap<String, Value>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl AppError {
    /// Construct a new error of the given kind with a caller-safe message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        AppError {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach a structured context field, used for logging only — never
    /// serialized into the caller-facing response.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying error that caused this one.
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// A caller-safe DTO snapshot, suitable for serializing into a
    /// response body. Drops the opaque `source` and internal context.
    pub fn to_dto(&self) -> AppErrorDto {
        AppErrorDto {
            code: self.kind.as_str().to_string(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("context", &self.context)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn StdError + 'static))
    }
}

/// Serializable, caller-safe snapshot of an [`AppError`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AppErrorDto {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for AppErrorDto {
    fn from(err: &AppError) -> Self {
        err.to_dto()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping_is_stable() {
        assert_eq!(ErrorKind::Unauthorized.http_status(), 401);
        assert_eq!(ErrorKind::Forbidden.http_status(), 403);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::Validation.http_status(), 422);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::ServiceUnavailable.http_status(), 503);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn display_renders_screaming_snake_code() {
        let err = AppError::not_found("project not found");
        assert_eq!(err.to_string(), "NOT_FOUND: project not found");
    }

    #[test]
    fn context_is_attached_but_excluded_from_dto() {
        let err = AppError::internal("db write failed").with_context("table", "events");
        assert_eq!(err.context().get("table").unwrap(), "events");
        let dto = err.to_dto();
        assert_eq!(dto.code, "INTERNAL_ERROR");
        assert_eq!(dto.message, "db write failed");
    }

    #[test]
    fn source_chain_is_preserved() {
        #[derive(Debug)]
        struct Inner;
        impl fmt::Display for Inner {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("inner failure")
            }
        }
        impl StdError for Inner {}

        let err = AppError::internal("wrapped").with_source(Inner);
        assert_eq!(err.source().unwrap().to_string(), "inner failure");
    }

    #[test]
    fn kind_serde_round_trips_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"RATE_LIMITED\"");
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::RateLimited);
    }

    #[test]
    fn dto_serializes_without_leaking_context() {
        let err = AppError::validation("bad email").with_context("field", "email");
        let dto = AppErrorDto::from(&err);
        let json = serde_json::to_value(&dto).unwrap();
        assert!(json.get("context").is_none());
        assert_eq!(json["code"], "VALIDATION_ERROR");
    }

    #[test]
    fn each_constructor_maps_to_the_right_kind() {
        assert_eq!(AppError::unauthorized("x").kind(), ErrorKind::Unauthorized);
        assert_eq!(AppError::forbidden("x").kind(), ErrorKind::Forbidden);
        assert_eq!(AppError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(AppError::rate_limited("x").kind(), ErrorKind::RateLimited);
        assert_eq!(
            AppError::service_unavailable("x").kind(),
            ErrorKind::ServiceUnavailable
        );
    }
}
