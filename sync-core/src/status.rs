//! Sync loop status.

use std::fmt;

/// Where the sync loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Not running.
    #[default]
    Stopped,
    /// First request of a session with no stored sync token.
    InitialSync,
    /// First request after a restart with a stored sync token.
    CatchupSync,
    /// Long-polling for new events.
    Syncing,
}

impl SyncStatus {
    /// Status a fresh start moves to.
    pub fn starting(has_token: bool) -> Self {
        if has_token {
            Self::CatchupSync
        } else {
            Self::InitialSync
        }
    }

    /// Check if the loop is running.
    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::InitialSync => "initial sync",
            Self::CatchupSync => "catchup sync",
            Self::Syncing => "syncing",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_depends_on_token() {
        assert_eq!(SyncStatus::starting(false), SyncStatus::InitialSync);
        assert_eq!(SyncStatus::starting(true), SyncStatus::CatchupSync);
    }

    #[test]
    fn only_stopped_is_not_running() {
        assert!(!SyncStatus::Stopped.is_running());
        assert!(SyncStatus::InitialSync.is_running());
        assert!(SyncStatus::Syncing.is_running());
    }
}
