use analytics_core::Granularity;
use analytics_error::AppResult;
use chrono::{DateTime, Utc};

use crate::{Pool, map_sqlx_err};

pub struct RollupRepo<'a> {
    pool: &'a Pool,
}

pub struct RollupAggregate {
    pub count: i64,
    pub unique_sessions: i64,
    pub unique_users: i64,
}

pub struct RollupEventCount {
    pub event_name: String,
    pub count: i64,
    pub unique_sessions: i64,
    pub unique_users: i64,
}

pub struct RollupBucket {
    pub bucket: DateTime<Utc>,
    pub count: i64,
}

impl<'a> RollupRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        RollupRepo { pool }
    }

    /// Aggregate raw events for the given hour into per-`(project_id,
    /// event_name)` rows and upsert them into `event_rollup_hourly`.
    /// Called periodically by the drain worker. Idempotent: re-running for
    /// the same hour recomputes from the current raw rows rather than
    /// incrementing, so it is always a full refresh of that hour, not an
    /// addition on top of the previous refresh.
    pub async fn compute_rollup_for_hour(&self, hour_start: DateTime<Utc>) -> AppResult<u64> {
        let hour_end = hour_start + chrono::Duration::hours(1);
        let rows: Vec<(i64, String, i64, i64, i64)> = sqlx::query_as(
            r#"SELECT project_id, event_name, count(*),
                      count(DISTINCT session_id) FILTER (WHERE session_id IS NOT NULL),
                      count(DISTINCT distinct_id) FILTER (WHERE distinct_id IS NOT NULL)
               FROM events
               WHERE "timestamp" >= $1 AND "timestamp" < $2
               GROUP BY project_id, event_name"#,
        )
        .bind(hour_start)
        .bind(hour_end)
        .fetch_all(self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut upserted = 0u64;
        for (project_id, event_name, count, unique_sessions, unique_users) in rows {
            sqlx::query(
                r#"INSERT INTO event_rollup_hourly
                   (project_id, event_name, hour, count, unique_sessions, unique_users)
                   VALUES ($1, $2, $3, $4, $5, $6)
                   ON CONFLICT ON CONSTRAINT uq_rollup_project_event_hour
                   DO UPDATE SET count = EXCLUDED.count,
                                 unique_sessions = EXCLUDED.unique_sessions,
                                 unique_users = EXCLUDED.unique_users"#,
            )
            .bind(project_id)
            .bind(&event_name)
            .bind(hour_start)
            .bind(count)
            .bind(unique_sessions)
            .bind(unique_users)
            .execute(self.pool)
            .await
            .map_err(map_sqlx_err)?;
            upserted += 1;
        }
        Ok(upserted)
    }

    pub async fn rollup_aggregate(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<RollupAggregate> {
        let row: (Option<i64>, Option<i64>, Option<i64>) = sqlx::query_as(
            r#"SELECT sum(count), sum(unique_sessions), sum(unique_users)
               FROM event_rollup_hourly
               WHERE project_id = $1 AND hour >= $2 AND hour < $3"#,
        )
        .bind(project_id)
        .bind(start)
        .bind(end)
        .fetch_one(self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(RollupAggregate {
            count: row.0.unwrap_or(0),
            unique_sessions: row.1.unwrap_or(0),
            unique_users: row.2.unwrap_or(0),
        })
    }

    pub async fn rollup_event_counts(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<RollupEventCount>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            r#"SELECT event_name, sum(count), sum(unique_sessions), sum(unique_users)
               FROM event_rollup_hourly
               WHERE project_id = $1 AND hour >= $2 AND hour < $3
               GROUP BY event_name"#,
        )
        .bind(project_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows
            .into_iter()
            .map(|(event_name, count, unique_sessions, unique_users)| RollupEventCount {
                event_name,
                count,
                unique_sessions,
                unique_users,
            })
            .collect())
    }

    pub async fn rollup_timeseries(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> AppResult<Vec<RollupBucket>> {
        let rows: Vec<(DateTime<Utc>, i64)> = match granularity {
            Granularity::Hour => {
                sqlx::query_as(
                    r#"SELECT hour, sum(count)
                       FROM event_rollup_hourly
                       WHERE project_id = $1 AND hour >= $2 AND hour < $3
                       GROUP BY hour"#,
                )
                .bind(project_id)
                .bind(start)
                .bind(end)
                .fetch_all(self.pool)
                .await
            }
            Granularity::Day => {
                sqlx::query_as(
                    r#"SELECT date_trunc('day', hour) AS bucket, sum(count)
                       FROM event_rollup_hourly
                       WHERE project_id = $1 AND hour >= $2 AND hour < $3
                       GROUP BY bucket"#,
                )
                .bind(project_id)
                .bind(start)
                .bind(end)
                .fetch_all(self.pool)
                .await
            }
        }
        .map_err(map_sqlx_err)?;
        Ok(rows
            .into_iter()
            .map(|(bucket, count)| RollupBucket { bucket, count })
            .collect())
    }
}
