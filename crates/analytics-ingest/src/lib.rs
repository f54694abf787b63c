//! Batch validation, project key resolution, and the all-or-nothing
//! append-then-fallback write that the ingest endpoint relies on.
//!
//! The durable buffer append is one atomic call for the whole batch. If it
//! fails, the coordinator falls back to one direct transactional write of
//! the whole batch to the raw event store — never a mix of partial buffer
//! success and partial fallback success.

use analytics_buffer::DurableBuffer;
use analytics_core::{sha256_hex, Event, IncomingEvent, Project};
use analytics_error::{AppError, AppResult};
use analytics_store::{EventRepo, Pool, ProjectRepo};
use chrono::Utc;
use uuid::Uuid;

pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 100;
pub const MAX_EVENT_NAME_LEN: usize = 255;

/// Look up a project by the plaintext API key presented in `X-API-Key`.
pub async fn resolve_project(pool: &Pool, plaintext_key: &str) -> AppResult<Project> {
    let key_hash = sha256_hex(plaintext_key.as_bytes());
    ProjectRepo::new(pool)
        .get_by_key_hash(&key_hash)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid project key"))
}

fn validate_batch(events: &[IncomingEvent]) -> AppResult<()> {
    if events.len() < MIN_BATCH_SIZE || events.len() > MAX_BATCH_SIZE {
        return Err(AppError::validation(format!(
            "batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {}",
            events.len()
        )));
    }
    for event in events {
        if event.event_name.trim().is_empty() {
            return Err(AppError::validation("event_name must not be empty"));
        }
        if event.event_name.len() > MAX_EVENT_NAME_LEN {
            return Err(AppError::validation(format!(
                "event_name must be at most {MAX_EVENT_NAME_LEN} characters"
            )));
        }
    }
    Ok(())
}

fn build_events(
    project_id: i64,
    incoming: Vec<IncomingEvent>,
    ip_hash: Option<String>,
    user_agent: Option<&str>,
) -> Vec<Event> {
    let now = Utc::now();
    incoming
        .into_iter()
        .map(|e| Event {
            event_uuid: Uuid::new_v4(),
            project_id,
            event_name: e.event_name,
            distinct_id: e.distinct_id,
            properties: e.properties,
            session_id: e.session_id,
            page_url: e.page_url,
            referrer: e.referrer,
            user_agent: e.user_agent.or_else(|| user_agent.map(str::to_owned)),
            ip_hash: ip_hash.clone(),
            timestamp: e.timestamp.unwrap_or(now),
        })
        .collect()
}

/// Ingest a validated batch of events for `project_id`.
///
/// Tries one atomic append to the durable buffer; on failure, falls back
/// to one direct transactional write to the raw event store. Either path
/// accepts the whole batch or none of it.
pub async fn ingest(
    buffer: &dyn DurableBuffer,
    pool: &Pool,
    project_id: i64,
    events: Vec<IncomingEvent>,
    client_ip_hash: Option<String>,
    user_agent: Option<&str>,
) -> AppResult<usize> {
    validate_batch(&events)?;
    let batch_len = events.len();
    let built = build_events(project_id, events, client_ip_hash, user_agent);

    match buffer.append_batch(project_id, &built).await {
        Ok(_ids) => Ok(batch_len),
        Err(e) => {
            tracing::warn!(error = %e, project_id, "durable buffer append failed, falling back to direct write");
            EventRepo::new(pool).insert_batch(&built).await.map_err(|e| {
                tracing::error!(error = %e, project_id, "fallback direct write also failed");
                AppError::service_unavailable("ingest temporarily unavailable")
            })?;
            Ok(batch_len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_buffer::fake::InMemoryBuffer;
    use analytics_core::IncomingEvent;

    fn sample(name: &str) -> IncomingEvent {
        IncomingEvent {
            event_name: name.to_owned(),
            distinct_id: Some("u1".to_owned()),
            properties: None,
            session_id: Some("s1".to_owned()),
            page_url: None,
            referrer: None,
            user_agent: None,
            timestamp: None,
        }
    }

    #[test]
    fn rejects_empty_batch() {
        assert!(validate_batch(&[]).is_err());
    }

    #[test]
    fn rejects_oversized_batch() {
        let events: Vec<_> = (0..101).map(|i| sample(&format!("e{i}"))).collect();
        assert!(validate_batch(&events).is_err());
    }

    #[test]
    fn accepts_boundary_sizes() {
        let one = vec![sample("a")];
        assert!(validate_batch(&one).is_ok());
        let hundred: Vec<_> = (0..100).map(|i| sample(&format!("e{i}"))).collect();
        assert!(validate_batch(&hundred).is_ok());
    }

    #[test]
    fn rejects_empty_event_name() {
        let events = vec![sample("")];
        assert!(validate_batch(&events).is_err());
    }

    #[test]
    fn rejects_overlong_event_name() {
        let events = vec![sample(&"x".repeat(256))];
        assert!(validate_batch(&events).is_err());
    }

    #[tokio::test]
    async fn buffer_append_success_is_reported_as_accepted() {
        let buffer = InMemoryBuffer::new();
        let events = vec![sample("page_view"), sample("click")];
        let built = build_events(1, events, Some("hash".to_owned()), Some("curl/8"));
        let accepted = buffer.append_batch(1, &built).await.unwrap();
        assert_eq!(accepted.len(), 2);
        assert_eq!(buffer.pending_count(), 2);
    }

    #[tokio::test]
    async fn buffer_failure_falls_through_to_caller() {
        let buffer = InMemoryBuffer::new();
        buffer.fail_next_append();
        let events = vec![sample("page_view")];
        let built = build_events(1, events, None, None);
        assert!(buffer.append_batch(1, &built).await.is_err());
    }
}
