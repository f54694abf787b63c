//! The wire shape pushed over the socket and published on the live
//! channel: `{event, distinct_id?, properties?, timestamp, project_id}`.
//! Distinct from the persisted [`analytics_core::Event`] shape (which
//! calls the field `event_name`), so the live layer re-shapes on the way
//! out rather than leaking storage field names onto the wire.

use analytics_core::Event;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct LivePush {
    pub event: String,
    pub distinct_id: Option<String>,
    pub properties: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub project_id: i64,
}

impl From<&Event> for LivePush {
    fn from(e: &Event) -> Self {
        LivePush {
            event: e.event_name.clone(),
            distinct_id: e.distinct_id.clone(),
            properties: e.properties.clone(),
            timestamp: e.timestamp,
            project_id: e.project_id,
        }
    }
}

/// Parse a raw channel payload (a serialized [`Event`]) and re-shape it
/// into the documented push format. Returns `None` on undecodable
/// payloads — the caller drops them silently, same policy as a dead
/// subscription.
pub fn reshape(raw: &str) -> Option<String> {
    let event: Event = serde_json::from_str(raw).ok()?;
    serde_json::to_string(&LivePush::from(&event)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn reshape_renames_event_name_to_event() {
        let e = Event {
            event_uuid: Uuid::new_v4(),
            project_id: 7,
            event_name: "page_view".into(),
            distinct_id: Some("u1".into()),
            properties: None,
            session_id: None,
            page_url: None,
            referrer: None,
            user_agent: None,
            ip_hash: None,
            timestamp: Utc::now(),
        };
        let raw = serde_json::to_string(&e).unwrap();
        let pushed = reshape(&raw).unwrap();
        let value: Value = serde_json::from_str(&pushed).unwrap();
        assert_eq!(value["event"], "page_view");
        assert!(value.get("event_name").is_none());
        assert_eq!(value["project_id"], 7);
    }

    #[test]
    fn reshape_rejects_garbage() {
        assert!(reshape("not json").is_none());
    }
}
