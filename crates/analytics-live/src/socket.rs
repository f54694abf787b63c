//! The per-connection socket pump: forwards fan-out messages to the
//! socket and awaits inbound frames purely to detect keep-alives and
//! disconnects. Cleans up the registry entry (and, if it was the last
//! connection for the project, the shared subscription) on every exit
//! path.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};

use crate::hub::LiveHub;

/// Drive one accepted, already-authorized socket for `project_id` until
/// it disconnects.
pub async fn handle_socket(mut socket: WebSocket, project_id: i64, hub: Arc<LiveHub>) {
    let (conn_id, mut rx) = hub.connect(project_id).await;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // keep-alive frames; no action needed
                    Some(Err(_)) => break,
                }
            }
        }
    }

    hub.disconnect(project_id, conn_id).await;
}
