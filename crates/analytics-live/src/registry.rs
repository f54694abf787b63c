//! Per-process connection registry keyed by `project_id`. Delivery to
//! each subscriber is independent: a send failure removes that one
//! connection (dead-connection reaping) without affecting the rest of
//! the broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<i64, Vec<Connection>>>,
    next_id: AtomicU64,
}

struct Connection {
    id: u64,
    sender: mpsc::UnboundedSender<String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `project_id`, returning its
    /// registry-local id (for later `disconnect`) and the receiving end of
    /// its outbound channel.
    pub fn connect(&self, project_id: i64) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .unwrap()
            .entry(project_id)
            .or_default()
            .push(Connection { id, sender: tx });
        (id, rx)
    }

    pub fn disconnect(&self, project_id: i64, id: u64) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(conns) = guard.get_mut(&project_id) {
            conns.retain(|c| c.id != id);
            if conns.is_empty() {
                guard.remove(&project_id);
            }
        }
    }

    /// Send `message` to every connection registered for `project_id`,
    /// removing any whose channel has closed.
    pub fn broadcast(&self, project_id: i64, message: &str) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(conns) = guard.get_mut(&project_id) {
            conns.retain(|c| c.sender.send(message.to_owned()).is_ok());
            if conns.is_empty() {
                guard.remove(&project_id);
            }
        }
    }

    pub fn connection_count(&self, project_id: i64) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get(&project_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_every_connection_for_the_project() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx1) = registry.connect(1);
        let (_, mut rx2) = registry.connect(1);
        let (_, mut rx_other) = registry.connect(2);

        registry.broadcast(1, "hello");

        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn disconnect_removes_only_that_connection() {
        let registry = ConnectionRegistry::new();
        let (id1, _rx1) = registry.connect(1);
        let (_id2, mut rx2) = registry.connect(1);

        registry.disconnect(1, id1);
        assert_eq!(registry.connection_count(1), 1);

        registry.broadcast(1, "still here");
        assert_eq!(rx2.try_recv().unwrap(), "still here");
    }

    #[test]
    fn dead_receiver_is_reaped_on_next_broadcast() {
        let registry = ConnectionRegistry::new();
        let (_, rx) = registry.connect(1);
        drop(rx);

        registry.broadcast(1, "nobody home");
        assert_eq!(registry.connection_count(1), 0);
    }
}
