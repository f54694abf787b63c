use analytics_core::{Event, Granularity};
use analytics_error::AppResult;
use chrono::{DateTime, Utc};

use crate::{Pool, map_sqlx_err};

pub struct EventRepo<'a> {
    pool: &'a Pool,
}

pub struct RawAggregate {
    pub count: i64,
    pub unique_sessions: i64,
    pub unique_users: i64,
}

pub struct RawEventCount {
    pub event_name: String,
    pub count: i64,
}

pub struct RawTopEvent {
    pub event_name: String,
    pub count: i64,
    pub unique_sessions: i64,
    pub unique_users: i64,
}

pub struct RawBucket {
    pub bucket: DateTime<Utc>,
    pub count: i64,
}

pub struct RawSession {
    pub session_id: String,
    pub count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub distinct_id: Option<String>,
}

pub struct RawUser {
    pub distinct_id: String,
    pub count: i64,
    pub unique_sessions: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl<'a> EventRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        EventRepo { pool }
    }

    /// Insert a batch of events in one transaction, skipping any row whose
    /// `event_uuid` already exists. Used both by the drain worker (batch
    /// persist) and by the ingest coordinator's direct-write fallback.
    pub async fn insert_batch(&self, events: &[Event]) -> AppResult<u64> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let mut inserted = 0u64;
        for event in events {
            let result = sqlx::query(
                r#"INSERT INTO events
                   (event_uuid, project_id, event_name, distinct_id, properties,
                    session_id, page_url, referrer, user_agent, ip_hash, "timestamp")
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                   ON CONFLICT (event_uuid) DO NOTHING"#,
            )
            .bind(event.event_uuid)
            .bind(event.project_id)
            .bind(&event.event_name)
            .bind(&event.distinct_id)
            .bind(&event.properties)
            .bind(&event.session_id)
            .bind(&event.page_url)
            .bind(&event.referrer)
            .bind(&event.user_agent)
            .bind(&event.ip_hash)
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(inserted)
    }

    pub async fn raw_aggregate(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<RawAggregate> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"SELECT count(*),
                      count(DISTINCT session_id) FILTER (WHERE session_id IS NOT NULL),
                      count(DISTINCT distinct_id) FILTER (WHERE distinct_id IS NOT NULL)
               FROM events
               WHERE project_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3"#,
        )
        .bind(project_id)
        .bind(start)
        .bind(end)
        .fetch_one(self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(RawAggregate {
            count: row.0,
            unique_sessions: row.1,
            unique_users: row.2,
        })
    }

    pub async fn raw_event_counts(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<RawEventCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT event_name, count(*)
               FROM events
               WHERE project_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3
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
            .map(|(event_name, count)| RawEventCount { event_name, count })
            .collect())
    }

    pub async fn raw_top_events(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<RawTopEvent>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            r#"SELECT event_name,
                      count(*),
                      count(DISTINCT session_id) FILTER (WHERE session_id IS NOT NULL),
                      count(DISTINCT distinct_id) FILTER (WHERE distinct_id IS NOT NULL)
               FROM events
               WHERE project_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3
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
            .map(|(event_name, count, unique_sessions, unique_users)| RawTopEvent {
                event_name,
                count,
                unique_sessions,
                unique_users,
            })
            .collect())
    }

    pub async fn raw_timeseries(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> AppResult<Vec<RawBucket>> {
        let trunc = match granularity {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        };
        let rows: Vec<(DateTime<Utc>, i64)> = sqlx::query_as(&format!(
            r#"SELECT date_trunc('{trunc}', "timestamp") AS bucket, count(*)
               FROM events
               WHERE project_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3
               GROUP BY bucket"#
        ))
        .bind(project_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows
            .into_iter()
            .map(|(bucket, count)| RawBucket { bucket, count })
            .collect())
    }

    pub async fn raw_sessions(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<RawSession>, i64)> {
        let rows: Vec<(String, i64, DateTime<Utc>, DateTime<Utc>, Option<String>)> = sqlx::query_as(
            r#"SELECT session_id, count(*), min("timestamp"), max("timestamp"), max(distinct_id)
               FROM events
               WHERE project_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3
                     AND session_id IS NOT NULL
               GROUP BY session_id
               ORDER BY max("timestamp") DESC
               LIMIT $4 OFFSET $5"#,
        )
        .bind(project_id)
        .bind(start)
        .bind(end)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let total: (i64,) = sqlx::query_as(
            r#"SELECT count(DISTINCT session_id)
               FROM events
               WHERE project_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3
                     AND session_id IS NOT NULL"#,
        )
        .bind(project_id)
        .bind(start)
        .bind(end)
        .fetch_one(self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let sessions = rows
            .into_iter()
            .map(|(session_id, count, first_seen, last_seen, distinct_id)| RawSession {
                session_id,
                count,
                first_seen,
                last_seen,
                distinct_id,
            })
            .collect();
        Ok((sessions, total.0))
    }

    pub async fn raw_users(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<RawUser>, i64)> {
        let rows: Vec<(String, i64, i64, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"SELECT distinct_id, count(*),
                      count(DISTINCT session_id) FILTER (WHERE session_id IS NOT NULL),
                      min("timestamp"), max("timestamp")
               FROM events
               WHERE project_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3
                     AND distinct_id IS NOT NULL
               GROUP BY distinct_id
               ORDER BY count(*) DESC
               LIMIT $4 OFFSET $5"#,
        )
        .bind(project_id)
        .bind(start)
        .bind(end)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let total: (i64,) = sqlx::query_as(
            r#"SELECT count(DISTINCT distinct_id)
               FROM events
               WHERE project_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3
                     AND distinct_id IS NOT NULL"#,
        )
        .bind(project_id)
        .bind(start)
        .bind(end)
        .fetch_one(self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let users = rows
            .into_iter()
            .map(
                |(distinct_id, count, unique_sessions, first_seen, last_seen)| RawUser {
                    distinct_id,
                    count,
                    unique_sessions,
                    first_seen,
                    last_seen,
                },
            )
            .collect();
        Ok((users, total.0))
    }
}
