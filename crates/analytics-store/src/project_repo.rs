use analytics_core::Project;
use analytics_error::{AppError, AppResult};
use chrono::{DateTime, Utc};

use crate::{Pool, map_sqlx_err};

pub struct ProjectRepo<'a> {
    pool: &'a Pool,
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    user_id: i64,
    name: String,
    key_hash: String,
    key_prefix: String,
    domain: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(r: ProjectRow) -> Self {
        Project {
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            key_hash: r.key_hash,
            key_prefix: r.key_prefix,
            domain: r.domain,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const COLUMNS: &str =
    "id, user_id, name, key_hash, key_prefix, domain, created_at, updated_at";

impl<'a> ProjectRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        ProjectRepo { pool }
    }

    pub async fn create(
        &self,
        user_id: i64,
        name: &str,
        domain: Option<&str>,
        key_hash: &str,
        key_prefix: &str,
    ) -> AppResult<Project> {
        sqlx::query_as::<_, ProjectRow>(&format!(
            r#"INSERT INTO projects (user_id, name, key_hash, key_prefix, domain)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {COLUMNS}"#
        ))
        .bind(user_id)
        .bind(name)
        .bind(key_hash)
        .bind(key_prefix)
        .bind(domain)
        .fetch_one(self.pool)
        .await
        .map(Project::from)
        .map_err(map_sqlx_err)
    }

    pub async fn get_owned(&self, project_id: i64, user_id: i64) -> AppResult<Project> {
        sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {COLUMNS} FROM projects WHERE id = $1 AND user_id = $2"
        ))
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(Project::from)
        .ok_or_else(|| AppError::not_found("project not found"))
    }

    pub async fn get_by_key_hash(&self, key_hash: &str) -> AppResult<Option<Project>> {
        sqlx::query_as::<_, ProjectRow>(&format!("SELECT {COLUMNS} FROM projects WHERE key_hash = $1"))
            .bind(key_hash)
            .fetch_optional(self.pool)
            .await
            .map(|opt| opt.map(Project::from))
            .map_err(map_sqlx_err)
    }

    pub async fn list_for_user(&self, user_id: i64) -> AppResult<Vec<Project>> {
        sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {COLUMNS} FROM projects WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await
        .map(|rows| rows.into_iter().map(Project::from).collect())
        .map_err(map_sqlx_err)
    }

    pub async fn update(
        &self,
        project_id: i64,
        user_id: i64,
        name: Option<&str>,
        domain: Option<Option<&str>>,
    ) -> AppResult<Project> {
        let current = self.get_owned(project_id, user_id).await?;
        let new_name = name.unwrap_or(&current.name);
        let new_domain = match domain {
            Some(d) => d,
            None => current.domain.as_deref(),
        };
        sqlx::query_as::<_, ProjectRow>(&format!(
            r#"UPDATE projects SET name = $1, domain = $2, updated_at = now()
               WHERE id = $3 AND user_id = $4
               RETURNING {COLUMNS}"#
        ))
        .bind(new_name)
        .bind(new_domain)
        .bind(project_id)
        .bind(user_id)
        .fetch_one(self.pool)
        .await
        .map(Project::from)
        .map_err(map_sqlx_err)
    }

    pub async fn rotate_key(
        &self,
        project_id: i64,
        user_id: i64,
        key_hash: &str,
        key_prefix: &str,
    ) -> AppResult<Project> {
        self.get_owned(project_id, user_id).await?;
        sqlx::query_as::<_, ProjectRow>(&format!(
            r#"UPDATE projects SET key_hash = $1, key_prefix = $2, updated_at = now()
               WHERE id = $3 AND user_id = $4
               RETURNING {COLUMNS}"#
        ))
        .bind(key_hash)
        .bind(key_prefix)
        .bind(project_id)
        .bind(user_id)
        .fetch_one(self.pool)
        .await
        .map(Project::from)
        .map_err(map_sqlx_err)
    }

    pub async fn delete(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND user_id = $2")
            .bind(project_id)
            .bind(user_id)
            .execute(self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("project not found"));
        }
        Ok(())
    }
}
