//! Maps the domain `AppError` taxonomy onto HTTP responses at the single
//! boundary where that translation belongs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use analytics_error::AppError;

pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_dto())).into_response()
    }
}
