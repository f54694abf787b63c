//! `GET /ws/events/{project_id}?ticket=...`: authenticates the ticket
//! before upgrading, then hands the accepted socket to the live hub's pump.

use axum::extract::ws::{CloseFrame, Message, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub ticket: Option<String>,
}

pub async fn ws_events(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match analytics_live::authenticate(state.kv.as_ref(), query.ticket.as_deref(), project_id).await {
        Ok(_user_id) => {
            let hub = state.hub.clone();
            ws.on_upgrade(move |socket| analytics_live::handle_socket(socket, project_id, hub))
        }
        Err(reason) => ws.on_upgrade(move |mut socket| async move {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: reason.code(),
                    reason: reason.reason().into(),
                })))
                .await;
        }),
    }
}
