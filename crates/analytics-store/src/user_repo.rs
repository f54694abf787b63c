use analytics_core::User;
use analytics_error::AppResult;
use chrono::{DateTime, Utc};

use crate::{Pool, map_sqlx_err};

pub struct UserRepo<'a> {
    pool: &'a Pool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password_hash: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            is_active: r.is_active,
            created_at: r.created_at,
        }
    }
}

impl<'a> UserRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        UserRepo { pool }
    }

    pub async fn create(&self, email: &str, password_hash: &str) -> AppResult<User> {
        sqlx::query_as::<_, UserRow>(
            r#"INSERT INTO users (email, password_hash) VALUES ($1, $2)
               RETURNING id, email, password_hash, is_active, created_at"#,
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(self.pool)
        .await
        .map(User::from)
        .map_err(map_sqlx_err)
    }

    pub async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, is_active, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(self.pool)
        .await
        .map(|opt| opt.map(User::from))
        .map_err(map_sqlx_err)
    }

    pub async fn get_by_id(&self, id: i64) -> AppResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, is_active, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map(|opt| opt.map(User::from))
        .map_err(map_sqlx_err)
    }

    /// Unique-constraint violations on `email` surface as `AppError::conflict`
    /// via `map_sqlx_err`.
    pub async fn update_email(&self, id: i64, new_email: &str) -> AppResult<User> {
        sqlx::query_as::<_, UserRow>(
            r#"UPDATE users SET email = $1 WHERE id = $2
               RETURNING id, email, password_hash, is_active, created_at"#,
        )
        .bind(new_email)
        .bind(id)
        .fetch_one(self.pool)
        .await
        .map(User::from)
        .map_err(map_sqlx_err)
    }
}
