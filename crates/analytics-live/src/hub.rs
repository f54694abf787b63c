//! Glues the in-process [`ConnectionRegistry`] to one shared broker
//! subscription per project: the first socket for a project triggers a
//! `subscribe`, every later socket for that project rides the same
//! subscription via the registry's broadcast, and the subscription is
//! torn down once the last socket for that project disconnects.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::registry::ConnectionRegistry;
use crate::subscriber::LiveSubscriber;

pub struct LiveHub {
    registry: Arc<ConnectionRegistry>,
    subscriber: Arc<dyn LiveSubscriber>,
    tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl LiveHub {
    pub fn new(subscriber: Arc<dyn LiveSubscriber>) -> Arc<Self> {
        Arc::new(LiveHub {
            registry: Arc::new(ConnectionRegistry::new()),
            subscriber,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn connect(&self, project_id: i64) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (id, rx) = self.registry.connect(project_id);

        let mut tasks = self.tasks.lock().await;
        if let std::collections::hash_map::Entry::Vacant(entry) = tasks.entry(project_id) {
            match self.subscriber.subscribe(project_id).await {
                Ok(mut channel_rx) => {
                    let registry = self.registry.clone();
                    let handle = tokio::spawn(async move {
                        while let Some(payload) = channel_rx.recv().await {
                            registry.broadcast(project_id, &payload);
                        }
                    });
                    entry.insert(handle);
                }
                Err(e) => {
                    tracing::warn!(error = %e, project_id, "failed to subscribe to live channel");
                }
            }
        }

        (id, rx)
    }

    pub async fn disconnect(&self, project_id: i64, id: u64) {
        self.registry.disconnect(project_id, id);
        if self.registry.connection_count(project_id) == 0 {
            if let Some(handle) = self.tasks.lock().await.remove(&project_id) {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::fake::InMemoryLiveSubscriber;

    #[tokio::test]
    async fn first_connect_subscribes_and_later_messages_fan_out() {
        let fake = Arc::new(InMemoryLiveSubscriber::new());
        let hub = LiveHub::new(fake.clone());

        let (id1, mut rx1) = hub.connect(1).await;
        let (_id2, mut rx2) = hub.connect(1).await;

        fake.publish(1, "hello");
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");

        hub.disconnect(1, id1).await;
        fake.publish(1, "still here");
        assert_eq!(rx2.recv().await.unwrap(), "still here");
    }
}
