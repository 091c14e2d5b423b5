// Error types shared by the store, feed and session layers

use thiserror::Error;

/// Errors raised while keeping a conversation in sync
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// The local store could not be read or written. Fatal for a session.
    #[error("Local store unavailable: {0}")]
    StoreUnavailable(String),

    /// A message could not be written to the remote log
    #[error("Remote delivery failed: {0}")]
    Delivery(String),

    /// The remote feed refused or dropped a subscription
    #[error("Feed subscription failed: {0}")]
    Subscription(String),

    /// A remote payload did not describe a message
    #[error("Malformed payload for {remote_id}: {reason}")]
    MalformedPayload { remote_id: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    /// The session task is gone
    #[error("Chat session closed")]
    SessionClosed,
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::StoreUnavailable(err.to_string())
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::StoreUnavailable("disk I/O error".to_string());
        assert_eq!(err.to_string(), "Local store unavailable: disk I/O error");

        let err = SyncError::MalformedPayload {
            remote_id: "-0001".to_string(),
            reason: "missing field `senderId`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed payload for -0001: missing field `senderId`"
        );
    }

    #[test]
    fn test_sqlite_errors_map_to_store_unavailable() {
        let err: SyncError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
    }
}
