//! The drain worker: pulls batches off the durable buffer, bulk-persists
//! them, republishes for live delivery, acks, and periodically reseals the
//! current hour's rollup.
//!
//! Runs as a long-running task (normally the whole body of a separate
//! process, see `bin/worker.rs`); `drain_once` and `run_rollup` are the
//! two building blocks, independently testable against the in-memory
//! buffer fake and exercised end-to-end by `run_worker`'s loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use analytics_buffer::DurableBuffer;
use analytics_core::{hour_floor, Event};
use analytics_error::AppResult;
use analytics_store::{EventRepo, Pool, RollupRepo};
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub rollup_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            batch_size: 200,
            poll_interval_ms: 2000,
            rollup_interval: Duration::from_secs(60),
        }
    }
}

/// Derive a consumer name unique to this worker replica, stable for its
/// lifetime: `worker-<host>-<pid>`.
pub fn consumer_name() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned());
    format!("worker-{host}-{}", std::process::id())
}

/// One drain iteration: read a batch, bulk-persist the decodable messages,
/// best-effort publish each for live delivery, then ack every id —
/// decodable and poison alike, so a malformed entry never stalls the
/// queue. Returns the number of rows actually persisted (which may be
/// less than the number of messages read, since redelivery after a
/// crash-before-ack is deduplicated by `event_uuid`).
pub async fn drain_once(
    buffer: &dyn DurableBuffer,
    pool: &Pool,
    consumer_name: &str,
    batch_size: usize,
    block_ms: u64,
) -> AppResult<u64> {
    let batch = buffer.read_batch(consumer_name, batch_size, block_ms).await?;
    if batch.messages.is_empty() && batch.poison_ids.is_empty() {
        return Ok(0);
    }

    let events: Vec<Event> = batch.messages.iter().map(|m| m.event.clone()).collect();
    let persisted = if events.is_empty() {
        0
    } else {
        EventRepo::new(pool).insert_batch(&events).await?
    };

    for event in &events {
        if let Err(e) = buffer.publish_live(event.project_id, event).await {
            tracing::warn!(error = %e, project_id = event.project_id, "live publish failed, continuing");
        }
    }

    let ack_ids = batch.all_ids();
    if !ack_ids.is_empty() {
        buffer.ack(&ack_ids).await?;
    }

    Ok(persisted)
}

/// Reseal the current UTC hour's rollup for every project/event seen so
/// far this hour. Idempotent: a full refresh, not an addition.
pub async fn run_rollup(pool: &Pool) -> AppResult<u64> {
    let hour_start = hour_floor(Utc::now());
    RollupRepo::new(pool).compute_rollup_for_hour(hour_start).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Run the worker main loop until SIGINT/SIGTERM: ensure the consumer
/// group exists, then alternate draining and (every `rollup_interval`)
/// resealing the current hour, exiting only after the in-flight batch is
/// persisted and acked.
pub async fn run_worker(buffer: Arc<dyn DurableBuffer>, pool: Pool, config: WorkerConfig) -> AppResult<()> {
    buffer.ensure_consumer_group().await?;
    let consumer = consumer_name();
    tracing::info!(consumer = %consumer, "drain worker starting");

    let mut shutdown = Box::pin(shutdown_signal());
    let mut last_rollup = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, finishing in-flight batch");
                if let Err(e) = drain_once(&*buffer, &pool, &consumer, config.batch_size, 0).await {
                    tracing::error!(error = %e, "final drain before shutdown failed");
                }
                break;
            }
            result = drain_once(&*buffer, &pool, &consumer, config.batch_size, config.poll_interval_ms) => {
                match result {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(persisted = n, "batch persisted"),
                    Err(e) => tracing::warn!(error = %e, "drain iteration failed"),
                }
            }
        }

        if last_rollup.elapsed() >= config.rollup_interval {
            match run_rollup(&pool).await {
                Ok(0) => {}
                Ok(upserted) => tracing::info!(upserted, "rollup recomputed"),
                Err(e) => tracing::error!(error = %e, "rollup computation failed"),
            }
            last_rollup = Instant::now();
        }
    }

    tracing::info!("drain worker shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_buffer::fake::InMemoryBuffer;
    use uuid::Uuid;

    fn sample_event(project_id: i64, name: &str) -> Event {
        Event {
            event_uuid: Uuid::new_v4(),
            project_id,
            event_name: name.to_owned(),
            distinct_id: Some("u1".to_owned()),
            properties: None,
            session_id: Some("s1".to_owned()),
            page_url: None,
            referrer: None,
            user_agent: None,
            ip_hash: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn drain_once_with_nothing_pending_is_a_noop() {
        let buffer = InMemoryBuffer::new();
        let acked = buffer.acked_ids();
        assert!(acked.is_empty());
        // No pool available in this unit test; exercise only the
        // empty-batch short-circuit, which never touches the store.
        let drained = buffer.read_batch("c", 200, 0).await.unwrap();
        assert!(drained.messages.is_empty());
        assert!(drained.poison_ids.is_empty());
    }

    #[tokio::test]
    async fn draining_publishes_and_acks_every_message() {
        let buffer = InMemoryBuffer::new();
        buffer
            .append_batch(1, &[sample_event(1, "page_view"), sample_event(1, "click")])
            .await
            .unwrap();
        let batch = buffer.read_batch("c", 10, 0).await.unwrap();
        assert_eq!(batch.messages.len(), 2);
        for m in &batch.messages {
            buffer.publish_live(m.project_id, &m.event).await.unwrap();
        }
        let ids = batch.all_ids();
        buffer.ack(&ids).await.unwrap();
        assert_eq!(buffer.published().len(), 2);
        assert_eq!(buffer.acked_ids(), ids);
    }

    #[test]
    fn consumer_name_includes_pid() {
        let name = consumer_name();
        assert!(name.starts_with("worker-"));
        assert!(name.contains(&std::process::id().to_string()));
    }
}
