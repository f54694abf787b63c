//! Socket handshake authorization: resolve and consume a ticket, then
//! check it names the project the caller is opening a socket for.

use analytics_security::{redeem_ws_ticket, KeyValueStore};

/// Reason a handshake was rejected, carrying the close code the spec
/// mandates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    MissingTicket,
    InvalidTicket,
    ProjectMismatch,
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            CloseReason::MissingTicket | CloseReason::InvalidTicket => 4001,
            CloseReason::ProjectMismatch => 4003,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            CloseReason::MissingTicket => "missing ticket",
            CloseReason::InvalidTicket => "invalid ticket",
            CloseReason::ProjectMismatch => "project not found",
        }
    }
}

/// Redeem `ticket` (single-use, consumed regardless of outcome) and check
/// it was issued for `requested_project_id`. Returns the authenticated
/// user id on success.
pub async fn authenticate(
    store: &dyn KeyValueStore,
    ticket: Option<&str>,
    requested_project_id: i64,
) -> Result<i64, CloseReason> {
    let ticket = ticket.ok_or(CloseReason::MissingTicket)?;
    let (ticket_project_id, user_id) = redeem_ws_ticket(store, ticket)
        .await
        .ok_or(CloseReason::InvalidTicket)?;
    if ticket_project_id != requested_project_id {
        return Err(CloseReason::ProjectMismatch);
    }
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_security::{issue_ws_ticket, InMemoryStore};

    #[tokio::test]
    async fn missing_ticket_is_rejected() {
        let store = InMemoryStore::new();
        let result = authenticate(&store, None, 1).await;
        assert_eq!(result, Err(CloseReason::MissingTicket));
    }

    #[tokio::test]
    async fn invalid_ticket_is_rejected() {
        let store = InMemoryStore::new();
        let result = authenticate(&store, Some("nonexistent"), 1).await;
        assert_eq!(result, Err(CloseReason::InvalidTicket));
    }

    #[tokio::test]
    async fn mismatched_project_is_rejected() {
        let store = InMemoryStore::new();
        let ticket = issue_ws_ticket(&store, 1, 42, 30).await.unwrap();
        let result = authenticate(&store, Some(&ticket), 2).await;
        assert_eq!(result, Err(CloseReason::ProjectMismatch));
    }

    #[tokio::test]
    async fn valid_ticket_authenticates_and_is_single_use() {
        let store = InMemoryStore::new();
        let ticket = issue_ws_ticket(&store, 1, 42, 30).await.unwrap();
        assert_eq!(authenticate(&store, Some(&ticket), 1).await, Ok(42));
        assert_eq!(authenticate(&store, Some(&ticket), 1).await, Err(CloseReason::InvalidTicket));
    }
}
