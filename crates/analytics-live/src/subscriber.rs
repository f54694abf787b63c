//! The cross-process half of live delivery: subscribing to a project's
//! pub/sub channel and forwarding reshaped messages into a local channel
//! the socket pump reads from.

use analytics_buffer::live_channel;
use analytics_error::{AppError, AppResult};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::push::reshape;

#[async_trait]
pub trait LiveSubscriber: Send + Sync {
    /// Subscribe to `project_id`'s channel. Returns the receiving half of
    /// an unbounded channel fed by a background task; the task exits (and
    /// drops the sender) when the broker connection closes or the
    /// returned receiver is dropped.
    async fn subscribe(&self, project_id: i64) -> AppResult<mpsc::UnboundedReceiver<String>>;
}

pub struct RedisLiveSubscriber {
    client: redis::Client,
}

impl RedisLiveSubscriber {
    pub fn new(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            AppError::service_unavailable("invalid redis url").with_context("cause", e.to_string())
        })?;
        Ok(RedisLiveSubscriber { client })
    }
}

#[async_trait]
impl LiveSubscriber for RedisLiveSubscriber {
    async fn subscribe(&self, project_id: i64) -> AppResult<mpsc::UnboundedReceiver<String>> {
        let channel = live_channel(project_id);
        let conn = self.client.get_async_connection().await.map_err(|e| {
            AppError::service_unavailable("redis unavailable").with_context("cause", e.to_string())
        })?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(&channel).await.map_err(|e| {
            AppError::service_unavailable("redis subscribe failed").with_context("cause", e.to_string())
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                let Some(pushed) = reshape(&payload) else {
                    tracing::warn!(channel = %channel, "undecodable live channel payload, dropping");
                    continue;
                };
                if tx.send(pushed).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Test double: `publish` fans directly into any receivers already
    /// returned by `subscribe` for that project, without a broker.
    #[derive(Default)]
    pub struct InMemoryLiveSubscriber {
        senders: Mutex<HashMap<i64, Vec<mpsc::UnboundedSender<String>>>>,
    }

    impl InMemoryLiveSubscriber {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn publish(&self, project_id: i64, message: &str) {
            let mut guard = self.senders.lock().unwrap();
            if let Some(list) = guard.get_mut(&project_id) {
                list.retain(|tx| tx.send(message.to_owned()).is_ok());
            }
        }
    }

    #[async_trait]
    impl LiveSubscriber for InMemoryLiveSubscriber {
        async fn subscribe(&self, project_id: i64) -> AppResult<mpsc::UnboundedReceiver<String>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().entry(project_id).or_default().push(tx);
            Ok(rx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::InMemoryLiveSubscriber;
    use super::*;

    #[tokio::test]
    async fn fake_subscriber_delivers_published_messages() {
        let sub = InMemoryLiveSubscriber::new();
        let mut rx = sub.subscribe(1).await.unwrap();
        sub.publish(1, "hello");
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn fake_subscriber_is_scoped_per_project() {
        let sub = InMemoryLiveSubscriber::new();
        let mut rx = sub.subscribe(1).await.unwrap();
        sub.publish(2, "wrong project");
        assert!(rx.try_recv().is_err());
    }
}
