//! Redis-backed key/value abstraction used for token revocation, login
//! lockout and single-use WS tickets, plus an in-memory fake for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration as StdDuration, Instant};

use analytics_error::{AppError, AppResult};
use async_trait::async_trait;

/// Minimal key/value surface this crate needs from Redis. Kept narrow so
/// tests can run against [`InMemoryStore`] instead of a live Redis server.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()>;
    async fn exists(&self, key: &str) -> AppResult<bool>;
    async fn del(&self, key: &str) -> AppResult<()>;
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    /// Atomically read and delete a key — used for single-use WS tickets.
    async fn get_del(&self, key: &str) -> AppResult<Option<String>>;
    /// List keys matching a `prefix*` glob.
    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;
    /// Increment a counter, setting its expiry only on first creation.
    async fn incr_ex(&self, key: &str, ttl_secs: u64) -> AppResult<i64>;
}

pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::service_unavailable("invalid redis url").with_context("cause", e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::service_unavailable("redis unavailable").with_context("cause", e.to_string()))?;
        Ok(RedisStore { conn })
    }
}

fn redis_unavailable(e: redis::RedisError) -> AppError {
    AppError::service_unavailable("redis unavailable").with_context("cause", e.to_string())
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(redis_unavailable)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map(|n| n > 0)
            .map_err(redis_unavailable)
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(redis_unavailable)
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(redis_unavailable)
    }

    async fn get_del(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(redis_unavailable)
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("KEYS")
            .arg(format!("{prefix}*"))
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(redis_unavailable)
    }

    async fn incr_ex(&self, key: &str, ttl_secs: u64) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_unavailable)?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async::<()>(&mut conn)
                .await
                .map_err(redis_unavailable)?;
        }
        Ok(count)
    }
}

/// In-memory fake used by unit tests in this crate and by callers testing
/// against this crate without a live Redis server.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(value: &(String, Option<Instant>)) -> bool {
        match value.1 {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        let deadline = Instant::now() + StdDuration::from_secs(ttl_secs);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let guard = self.entries.lock().unwrap();
        Ok(guard.get(key).is_some_and(Self::is_live))
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let guard = self.entries.lock().unwrap();
        Ok(guard
            .get(key)
            .filter(|v| Self::is_live(v))
            .map(|v| v.0.clone()))
    }

    async fn get_del(&self, key: &str) -> AppResult<Option<String>> {
        let mut guard = self.entries.lock().unwrap();
        match guard.remove(key) {
            Some(v) if Self::is_live(&v) => Ok(Some(v.0)),
            _ => Ok(None),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let guard = self.entries.lock().unwrap();
        Ok(guard
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && Self::is_live(v))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn incr_ex(&self, key: &str, ttl_secs: u64) -> AppResult<i64> {
        let mut guard = self.entries.lock().unwrap();
        let deadline = Instant::now() + StdDuration::from_secs(ttl_secs);
        let entry = guard.entry(key.to_string()).or_insert(("0".into(), Some(deadline)));
        let next = entry.0.parse::<i64>().unwrap_or(0) + 1;
        entry.0 = next.to_string();
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Access/refresh token lifecycle
// ---------------------------------------------------------------------------

fn access_token_key(jti: &str) -> String {
    format!("access_token:{jti}")
}

fn user_access_index_key(user_id: i64, jti: &str) -> String {
    format!("user_access_tokens:{user_id}:{jti}")
}

fn refresh_token_key(jti: &str) -> String {
    format!("refresh_token:{jti}")
}

fn user_refresh_index_key(user_id: i64, jti: &str) -> String {
    format!("user_tokens:{user_id}:{jti}")
}

pub async fn store_access_token(store: &dyn KeyValueStore, user_id: i64, jti: &str, ttl_secs: u64) {
    if let Err(e) = store.set_ex(&access_token_key(jti), "1", ttl_secs).await {
        tracing::warn!(error = %e, "failed to store access token");
    }
    if let Err(e) = store
        .set_ex(&user_access_index_key(user_id, jti), "1", ttl_secs)
        .await
    {
        tracing::warn!(error = %e, "failed to store access token user index");
    }
}

/// Fail-closed: any Redis error, or a missing key, is treated as revoked.
pub async fn is_access_token_revoked(store: &dyn KeyValueStore, jti: &str) -> bool {
    match store.exists(&access_token_key(jti)).await {
        Ok(present) => !present,
        Err(e) => {
            tracing::warn!(error = %e, "revocation check failed, treating token as revoked");
            true
        }
    }
}

pub async fn revoke_access_token(store: &dyn KeyValueStore, user_id: i64, jti: &str) {
    if let Err(e) = store.del(&access_token_key(jti)).await {
        tracing::warn!(error = %e, "failed to revoke access token");
    }
    if let Err(e) = store.del(&user_access_index_key(user_id, jti)).await {
        tracing::warn!(error = %e, "failed to remove access token user index");
    }
}

pub async fn revoke_all_user_access_tokens(store: &dyn KeyValueStore, user_id: i64) {
    revoke_indexed(store, &format!("user_access_tokens:{user_id}:"), |jti| {
        access_token_key(jti)
    })
    .await;
}

pub async fn store_refresh_token(store: &dyn KeyValueStore, user_id: i64, jti: &str, ttl_secs: u64) {
    if let Err(e) = store.set_ex(&refresh_token_key(jti), "1", ttl_secs).await {
        tracing::warn!(error = %e, "failed to store refresh token");
    }
    if let Err(e) = store
        .set_ex(&user_refresh_index_key(user_id, jti), "1", ttl_secs)
        .await
    {
        tracing::warn!(error = %e, "failed to store refresh token user index");
    }
}

pub async fn is_refresh_token_revoked(store: &dyn KeyValueStore, jti: &str) -> bool {
    match store.exists(&refresh_token_key(jti)).await {
        Ok(present) => !present,
        Err(e) => {
            tracing::warn!(error = %e, "revocation check failed, treating token as revoked");
            true
        }
    }
}

pub async fn revoke_refresh_token(store: &dyn KeyValueStore, user_id: i64, jti: &str) {
    if let Err(e) = store.del(&refresh_token_key(jti)).await {
        tracing::warn!(error = %e, "failed to revoke refresh token");
    }
    if let Err(e) = store.del(&user_refresh_index_key(user_id, jti)).await {
        tracing::warn!(error = %e, "failed to remove refresh token user index");
    }
}

pub async fn revoke_all_user_refresh_tokens(store: &dyn KeyValueStore, user_id: i64) {
    revoke_indexed(store, &format!("user_tokens:{user_id}:"), refresh_token_key).await;
}

/// Revoke every access and refresh token for a user. Used on logout and
/// password change.
pub async fn revoke_all_user_tokens(store: &dyn KeyValueStore, user_id: i64) {
    revoke_all_user_access_tokens(store, user_id).await;
    revoke_all_user_refresh_tokens(store, user_id).await;
}

async fn revoke_indexed(store: &dyn KeyValueStore, index_prefix: &str, token_key_for: impl Fn(&str) -> String) {
    let keys = match store.scan_prefix(index_prefix).await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(error = %e, "failed to scan token index for bulk revocation");
            return;
        }
    };
    for index_key in keys {
        if let Some(jti) = index_key.strip_prefix(index_prefix) {
            if let Err(e) = store.del(&token_key_for(jti)).await {
                tracing::warn!(error = %e, "failed to revoke token during bulk revocation");
            }
        }
        if let Err(e) = store.del(&index_key).await {
            tracing::warn!(error = %e, "failed to remove token index entry");
        }
    }
}

// ---------------------------------------------------------------------------
// Login lockout
// ---------------------------------------------------------------------------

const LOCKOUT_PREFIX: &str = "login_failures:";
pub const MAX_LOGIN_FAILURES: i64 = 5;
pub const LOCKOUT_SECONDS: u64 = 900;

fn lockout_key(email: &str) -> String {
    format!("{LOCKOUT_PREFIX}{email}")
}

/// Fail-open: a Redis error is treated as "not locked" rather than denying
/// every login attempt during an outage.
pub async fn check_account_locked(store: &dyn KeyValueStore, email: &str) -> bool {
    match store.get(&lockout_key(email)).await {
        Ok(Some(count)) => count.parse::<i64>().unwrap_or(0) >= MAX_LOGIN_FAILURES,
        Ok(None) => false,
        Err(e) => {
            tracing::warn!(error = %e, "lockout check failed, failing open");
            false
        }
    }
}

pub async fn record_failed_login(store: &dyn KeyValueStore, email: &str) {
    if let Err(e) = store.incr_ex(&lockout_key(email), LOCKOUT_SECONDS).await {
        tracing::warn!(error = %e, "failed to record failed login attempt");
    }
}

pub async fn clear_failed_logins(store: &dyn KeyValueStore, email: &str) {
    if let Err(e) = store.del(&lockout_key(email)).await {
        tracing::warn!(error = %e, "failed to clear failed login counter");
    }
}

// ---------------------------------------------------------------------------
// Single-use WebSocket tickets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TicketPayload {
    project_id: i64,
    user_id: i64,
}

fn ticket_key(ticket: &str) -> String {
    format!("ws_ticket:{ticket}")
}

/// Issue a single-use ticket good for `ttl_secs` (30s per the live-delivery
/// redesign), scoped to one project for one authenticated user.
pub async fn issue_ws_ticket(
    store: &dyn KeyValueStore,
    project_id: i64,
    user_id: i64,
    ttl_secs: u64,
) -> AppResult<String> {
    let ticket = uuid::Uuid::new_v4().to_string();
    let payload = serde_json::to_string(&TicketPayload { project_id, user_id })
        .expect("TicketPayload serialization cannot fail");
    store.set_ex(&ticket_key(&ticket), &payload, ttl_secs).await?;
    Ok(ticket)
}

/// Redeem a ticket exactly once. Returns `(project_id, user_id)` if the
/// ticket was present and unexpired; `None` otherwise (including on a
/// second redemption attempt).
pub async fn redeem_ws_ticket(store: &dyn KeyValueStore, ticket: &str) -> Option<(i64, i64)> {
    let raw = store.get_del(&ticket_key(ticket)).await.ok().flatten()?;
    let payload: TicketPayload = serde_json::from_str(&raw).ok()?;
    Some((payload.project_id, payload.user_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn access_token_is_valid_once_stored() {
        let store = InMemoryStore::new();
        store_access_token(&store, 1, "jti-1", 60).await;
        assert!(!is_access_token_revoked(&store, "jti-1").await);
    }

    #[tokio::test]
    async fn unknown_jti_is_treated_as_revoked() {
        let store = InMemoryStore::new();
        assert!(is_access_token_revoked(&store, "never-issued").await);
    }

    #[tokio::test]
    async fn revoking_a_token_makes_it_invalid() {
        let store = InMemoryStore::new();
        store_access_token(&store, 1, "jti-1", 60).await;
        revoke_access_token(&store, 1, "jti-1").await;
        assert!(is_access_token_revoked(&store, "jti-1").await);
    }

    #[tokio::test]
    async fn bulk_revocation_invalidates_every_token_for_a_user() {
        let store = InMemoryStore::new();
        store_access_token(&store, 7, "a", 60).await;
        store_access_token(&store, 7, "b", 60).await;
        store_access_token(&store, 9, "c", 60).await;
        revoke_all_user_access_tokens(&store, 7).await;
        assert!(is_access_token_revoked(&store, "a").await);
        assert!(is_access_token_revoked(&store, "b").await);
        assert!(!is_access_token_revoked(&store, "c").await);
    }

    #[tokio::test]
    async fn account_locks_after_max_failures() {
        let store = InMemoryStore::new();
        for _ in 0..MAX_LOGIN_FAILURES {
            record_failed_login(&store, "a@example.com").await;
        }
        assert!(check_account_locked(&store, "a@example.com").await);
    }

    #[tokio::test]
    async fn account_not_locked_below_threshold() {
        let store = InMemoryStore::new();
        for _ in 0..MAX_LOGIN_FAILURES - 1 {
            record_failed_login(&store, "a@example.com").await;
        }
        assert!(!check_account_locked(&store, "a@example.com").await);
    }

    #[tokio::test]
    async fn clearing_failed_logins_unlocks_the_account() {
        let store = InMemoryStore::new();
        for _ in 0..MAX_LOGIN_FAILURES {
            record_failed_login(&store, "a@example.com").await;
        }
        clear_failed_logins(&store, "a@example.com").await;
        assert!(!check_account_locked(&store, "a@example.com").await);
    }

    #[tokio::test]
    async fn ws_ticket_redeems_exactly_once() {
        let store = InMemoryStore::new();
        let ticket = issue_ws_ticket(&store, 1, 2, 30).await.unwrap();
        assert_eq!(redeem_ws_ticket(&store, &ticket).await, Some((1, 2)));
        assert_eq!(redeem_ws_ticket(&store, &ticket).await, None);
    }

    #[tokio::test]
    async fn unknown_ticket_does_not_redeem() {
        let store = InMemoryStore::new();
        assert_eq!(redeem_ws_ticket(&store, "bogus").await, None);
    }
}
