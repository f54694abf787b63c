//! Postgres persistence for the analytics backend, via `sqlx`.
//!
//! Every repository method maps a `sqlx::Error` into an [`analytics_error::AppError`]
//! at the boundary so callers never have to match on a database-specific
//! error type.

mod event_repo;
mod project_repo;
mod rollup_repo;
mod user_repo;

pub use event_repo::EventRepo;
pub use project_repo::ProjectRepo;
pub use rollup_repo::RollupRepo;
pub use user_repo::UserRepo;

use analytics_error::{AppError, AppResult};
use sqlx::postgres::PgPoolOptions;

pub type Pool = sqlx::PgPool;

pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Pool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| {
            AppError::service_unavailable("failed to connect to the database")
                .with_context("cause", e.to_string())
        })
}

pub async fn run_migrations(pool: &Pool) -> AppResult<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        AppError::internal("failed to run database migrations").with_context("cause", e.to_string())
    })
}

pub(crate) fn map_sqlx_err(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::RowNotFound => AppError::not_found("resource not found"),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::conflict("resource already exists")
        }
        other => {
            tracing::error!(error = %other, "database operation failed");
            AppError::internal("database operation failed")
        }
    }
}

/// Ready-check: a short-timeout ping used by the `/ready` endpoint.
pub async fn ping(pool: &Pool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(map_sqlx_err)
}
