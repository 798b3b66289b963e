use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RoomLifecycle;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the server.
    RateLimited,
    /// A request exceeded its time budget.
    Timeout,
    /// Local persistence failure.
    Storage,
    /// Payload could not be decoded.
    Serialization,
    /// Invariant break inside the engine.
    Internal,
}

/// Stable error payload returned by collaborators and engine operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    pub category: SyncErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Error for a REST response with a non-success status.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(
            classify_http_status(status),
            format!("http_{status}"),
            message,
        )
    }

    /// Room membership transition that is not allowed from the current state.
    pub fn invalid_state(
        room_id: &str,
        current: RoomLifecycle,
        action: impl Into<String>,
    ) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' for room {room_id} while it is {current:?}"),
        )
    }

    pub fn not_connected(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Network,
            "not_connected",
            format!("cannot run '{action}' while the socket is disconnected"),
        )
    }

    pub fn no_active_room(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Config,
            "no_active_room",
            format!("cannot run '{action}' without an active room"),
        )
    }

    pub fn timeout(action: impl Into<String>, after: Duration) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Timeout,
            "request_timeout",
            format!("'{action}' did not complete within {} ms", after.as_millis()),
        )
    }

    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            SyncErrorCategory::Network | SyncErrorCategory::RateLimited | SyncErrorCategory::Timeout
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> SyncErrorCategory {
    match status {
        401 | 403 => SyncErrorCategory::Auth,
        408 => SyncErrorCategory::Timeout,
        429 => SyncErrorCategory::RateLimited,
        400..=499 => SyncErrorCategory::Config,
        500..=599 => SyncErrorCategory::Network,
        _ => SyncErrorCategory::Internal,
    }
}

/// Errors reported by store persistence backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
    /// Stored data could not be decoded.
    #[error("persisted store is corrupt: {0}")]
    Corrupt(String),
    #[error("persistence backend failure: {0}")]
    Backend(String),
}

impl From<PersistenceError> for SyncError {
    fn from(err: PersistenceError) -> Self {
        let (category, code) = match &err {
            PersistenceError::Unavailable(_) => (SyncErrorCategory::Storage, "storage_unavailable"),
            PersistenceError::Corrupt(_) => (SyncErrorCategory::Serialization, "store_corrupt"),
            PersistenceError::Backend(_) => (SyncErrorCategory::Storage, "storage_failure"),
        };
        Self::new(category, code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(403), SyncErrorCategory::Auth);
        assert_eq!(classify_http_status(408), SyncErrorCategory::Timeout);
        assert_eq!(classify_http_status(429), SyncErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), SyncErrorCategory::Config);
        assert_eq!(classify_http_status(502), SyncErrorCategory::Network);
        assert_eq!(classify_http_status(302), SyncErrorCategory::Internal);
    }

    #[test]
    fn http_errors_carry_status_code() {
        let err = SyncError::from_http_status(503, "upstream down");
        assert_eq!(err.code, "http_503");
        assert!(err.is_recoverable());

        let err = SyncError::from_http_status(401, "expired token");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = SyncError::invalid_state("7", RoomLifecycle::Leaving, "finish_join");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, SyncErrorCategory::Internal);
        assert!(err.message.contains("Leaving"));
    }

    #[test]
    fn timeouts_are_recoverable() {
        let err = SyncError::timeout("list_messages", Duration::from_secs(10));
        assert_eq!(err.category, SyncErrorCategory::Timeout);
        assert!(err.message.contains("10000 ms"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn persistence_errors_map_to_storage_categories() {
        let err = SyncError::from(PersistenceError::Corrupt("bad json".to_owned()));
        assert_eq!(err.category, SyncErrorCategory::Serialization);
        assert_eq!(err.code, "store_corrupt");
        assert!(err.message.contains("bad json"));

        let err = SyncError::from(PersistenceError::Unavailable("read-only".to_owned()));
        assert_eq!(err.category, SyncErrorCategory::Storage);
        assert_eq!(err.code, "storage_unavailable");

        let err = SyncError::from(PersistenceError::Backend("EIO".to_owned()));
        assert_eq!(err.category, SyncErrorCategory::Storage);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = SyncError::new(SyncErrorCategory::RateLimited, "rate_limited", "wait")
            .with_retry_after(Duration::from_secs(2));
        assert_eq!(err.retry_after_ms, Some(2000));
    }
}
