//! Error type of the client crate.

use crate::config::ConfigError;
use crate::storage::StorageError;
use sync_core::{QueueError, SortKey, TimelineError};
use sync_types::{ApiError, RoomId};
use thiserror::Error;

/// Errors surfaced by the sync client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Homeserver request failed.
    #[error("homeserver request failed: {0}")]
    Api(#[from] ApiError),

    /// Storage transaction failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Timeline update rejected.
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    /// Pending queue operation rejected.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The room is not known to the session.
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    /// No timeline entry at this key.
    #[error("no timeline entry at {0}")]
    UnknownEntry(SortKey),
}

impl ClientError {
    /// Check if the homeserver could not be reached.
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Api(e) if e.is_connection())
    }

    /// Check if the operation was aborted by the client itself.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ClientError::Api(e) if e.is_aborted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_api_errors() {
        let lost = ClientError::from(ApiError::Connection("refused".into()));
        assert!(lost.is_connection());
        assert!(!lost.is_aborted());

        let aborted = ClientError::from(ApiError::Aborted);
        assert!(aborted.is_aborted());
        assert!(!aborted.is_connection());

        let unknown = ClientError::UnknownRoom(RoomId::new("!r:example.org"));
        assert!(!unknown.is_connection());
        assert_eq!(unknown.to_string(), "unknown room: !r:example.org");
    }
}
