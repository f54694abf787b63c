//! Domain types shared across the ingest, worker, query and daemon crates.
//!
//! `Project`, `Event` and `HourlyRollup` mirror the persisted schema one for
//! one; the remaining types are wire payloads exchanged over HTTP and the
//! durable buffer.

use chrono::{DateTime, Timelike, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Version of the ingest/query wire contract. Bump when a breaking change
/// is made to any type in this crate.
///
/// ```
/// assert_eq!(analytics_core::CONTRACT_VERSION, 1);
/// ```
pub const CONTRACT_VERSION: u32 = 1;

/// A tenant. The plaintext API key is never persisted — only its hash and
/// a short, non-secret prefix used for display and lookup-narrowing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    /// SHA-256 hex digest of the full API key. Never serialized back out.
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// First 12 characters of the plaintext key, safe to display.
    pub key_prefix: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A freshly generated or rotated API key: the plaintext (shown exactly
/// once) plus the hash/prefix pair that gets persisted.
pub struct GeneratedApiKey {
    pub plaintext: String,
    pub key_hash: String,
    pub key_prefix: String,
}

/// Generate a new project API key of the form `proj_<43 url-safe base64 chars>`.
pub fn generate_api_key() -> GeneratedApiKey {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = base64_url(&bytes);
    let plaintext = format!("proj_{token}");
    let key_hash = sha256_hex(plaintext.as_bytes());
    let key_prefix = plaintext.chars().take(12).collect();
    GeneratedApiKey {
        plaintext,
        key_hash,
        key_prefix,
    }
}

fn base64_url(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest of the given bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// A single analytics event, either fresh off the wire or loaded from
/// storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    /// Dedup key. Generated by the ingest coordinator, carried through the
    /// durable buffer, and enforced as a unique constraint at the store.
    pub event_uuid: Uuid,
    pub project_id: i64,
    pub event_name: String,
    pub distinct_id: Option<String>,
    #[serde(default)]
    pub properties: Option<Value>,
    pub session_id: Option<String>,
    pub page_url: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// HMAC-SHA256 of the client IP, salted with the current UTC date so
    /// hashes do not correlate across days. `None` when the IP is unknown.
    pub ip_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An hourly aggregate row for one `(project_id, event_name, hour)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HourlyRollup {
    pub project_id: i64,
    pub hour: DateTime<Utc>,
    pub count: i64,
    pub unique_sessions: i64,
    pub unique_users: i64,
}

/// Floor a timestamp to the start of its UTC hour.
pub fn hour_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("zeroing minute/second/nanosecond never fails")
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// One event as submitted by a client SDK, before `event_uuid`/`ip_hash`
/// are attached by the ingest coordinator.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct IncomingEvent {
    pub event_name: String,
    pub distinct_id: Option<String>,
    #[serde(default)]
    pub properties: Option<Value>,
    pub session_id: Option<String>,
    pub page_url: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// Client-supplied timestamp; if absent, the server's receipt time is
    /// used instead.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EventIngestRequest {
    pub events: Vec<IncomingEvent>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct EventIngestResponse {
    pub accepted: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ProjectResponse {
    pub id: i64,
    pub name: String,
    pub key_prefix: String,
    pub domain: Option<String>,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Project> for ProjectResponse {
    fn from(p: &Project) -> Self {
        ProjectResponse {
            id: p.id,
            name: p.name.clone(),
            key_prefix: p.key_prefix.clone(),
            domain: p.domain.clone(),
            user_id: p.user_id,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// `ProjectResponse` plus the plaintext key, returned exactly once: on
/// project creation and on key rotation.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ProjectCreateResponse {
    #[serde(flatten)]
    pub project: ProjectResponse,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct OverviewMetrics {
    pub total_events: i64,
    pub unique_sessions: i64,
    pub unique_users: i64,
    pub top_event: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TimeseriesPoint {
    pub timestamp: DateTime<Utc>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TopEvent {
    pub event_name: String,
    pub count: i64,
    pub unique_sessions: i64,
    pub unique_users: i64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SessionSummary {
    pub session_id: String,
    pub count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub distinct_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct UserSummary {
    pub distinct_id: String,
    pub count: i64,
    pub unique_sessions: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// An account holder. `password_hash` is the argon2 hash, never
/// serialized out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        UserResponse {
            id: u.id,
            email: u.email.clone(),
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EmailChangeRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ProjectCreateRequest {
    pub name: String,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ProjectUpdateRequest {
    pub name: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WsTicketRequest {
    pub project_id: i64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct WsTicketResponse {
    pub ticket: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hour_floor_zeroes_minute_second_nanosecond() {
        let ts = "2026-07-30T14:37:21.500Z".parse::<DateTime<Utc>>().unwrap();
        let floored = hour_floor(ts);
        assert_eq!(floored.minute(), 0);
        assert_eq!(floored.second(), 0);
        assert_eq!(floored.nanosecond(), 0);
        assert_eq!(floored.hour(), 14);
    }

    #[test]
    fn hour_floor_is_idempotent() {
        let ts = "2026-07-30T14:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(hour_floor(ts), ts);
        assert_eq!(hour_floor(hour_floor(ts)), hour_floor(ts));
    }

    #[test]
    fn generated_api_key_has_expected_shape() {
        let key = generate_api_key();
        assert!(key.plaintext.starts_with("proj_"));
        assert_eq!(key.key_prefix.len(), 12);
        assert_eq!(key.key_hash, sha256_hex(key.plaintext.as_bytes()));
    }

    #[test]
    fn two_generated_keys_never_collide() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.key_hash, b.key_hash);
    }

    #[test]
    fn project_response_never_carries_key_hash() {
        let project = Project {
            id: 1,
            user_id: 1,
            name: "demo".into(),
            key_hash: "secret-hash".into(),
            key_prefix: "proj_abc123".into(),
            domain: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let response = ProjectResponse::from(&project);
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("key_hash").is_none());
        assert_eq!(json["key_prefix"], "proj_abc123");
    }
}
