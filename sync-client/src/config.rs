//! Configuration for the sync engine.
//!
//! Built in code with the `with_*` methods, or loaded from a TOML file:
//!
//! ```toml
//! homeserver_url = "https://matrix.example.org"
//! user_id = "@alice:example.org"
//! access_token = "syt_..."
//! sync_timeout_secs = 30
//! store_path = "/var/lib/roomsync/store.db"
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_types::UserId;

/// Configuration for [`SyncClient`](crate::SyncClient).
#[derive(Clone, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the homeserver.
    pub homeserver_url: String,
    /// The logged-in user.
    pub user_id: UserId,
    /// Access token of the session.
    pub access_token: String,
    /// Long-poll timeout of sync requests in seconds (default: 30).
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    /// Extra client-side time on top of the long-poll timeout before a sync
    /// request is abandoned, in seconds (default: 5).
    #[serde(default = "default_request_slack_secs")]
    pub request_slack_secs: u64,
    /// Timeout of a reachability probe in seconds (default: 10).
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// First retry delay in milliseconds (default: 2000).
    #[serde(default = "default_retry_start_ms")]
    pub retry_start_ms: u64,
    /// Retry delay cap in seconds (default: 300).
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,
    /// Only sync membership events of timeline senders (default: true).
    #[serde(default = "default_lazy_load_members")]
    pub lazy_load_members: bool,
    /// Maximum pending events per room (default: 1000).
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,
    /// Events requested per gap fill (default: 50).
    #[serde(default = "default_pagination_limit")]
    pub pagination_limit: u32,
    /// SQLite database file of the store. In-memory only when unset.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

// Default value functions
fn default_sync_timeout_secs() -> u64 {
    30
}

fn default_request_slack_secs() -> u64 {
    5
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_retry_start_ms() -> u64 {
    2000
}

fn default_retry_max_secs() -> u64 {
    5 * 60
}

fn default_lazy_load_members() -> bool {
    true
}

fn default_pending_capacity() -> usize {
    1000
}

fn default_pagination_limit() -> u32 {
    50
}

impl SyncConfig {
    /// Create a configuration with default timings.
    pub fn new(homeserver_url: &str, user_id: UserId, access_token: &str) -> Self {
        Self {
            homeserver_url: homeserver_url.to_string(),
            user_id,
            access_token: access_token.to_string(),
            sync_timeout_secs: default_sync_timeout_secs(),
            request_slack_secs: default_request_slack_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            retry_start_ms: default_retry_start_ms(),
            retry_max_secs: default_retry_max_secs(),
            lazy_load_members: default_lazy_load_members(),
            pending_capacity: default_pending_capacity(),
            pagination_limit: default_pagination_limit(),
            store_path: None,
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the long-poll timeout.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the retry delay bounds.
    pub fn with_retry(mut self, start: Duration, max: Duration) -> Self {
        self.retry_start_ms = start.as_millis().try_into().unwrap_or(u64::MAX);
        self.retry_max_secs = max.as_secs();
        self
    }

    /// Set the per-room pending event capacity.
    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity;
        self
    }

    /// Set the store database file.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Long-poll timeout of sync requests.
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    /// Client-side deadline of a sync request with the given poll timeout.
    ///
    /// Always strictly greater than the poll timeout.
    pub fn request_timeout(&self, poll_timeout: Duration) -> Duration {
        poll_timeout + Duration::from_secs(self.request_slack_secs.max(1))
    }

    /// Timeout of a reachability probe.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// First retry delay.
    pub fn retry_start(&self) -> Duration {
        Duration::from_millis(self.retry_start_ms)
    }

    /// Retry delay cap.
    pub fn retry_max(&self) -> Duration {
        Duration::from_secs(self.retry_max_secs)
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("homeserver_url", &self.homeserver_url)
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .field("sync_timeout_secs", &self.sync_timeout_secs)
            .field("request_slack_secs", &self.request_slack_secs)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("retry_start_ms", &self.retry_start_ms)
            .field("retry_max_secs", &self.retry_max_secs)
            .field("lazy_load_members", &self.lazy_load_members)
            .field("pending_capacity", &self.pending_capacity)
            .field("pagination_limit", &self.pagination_limit)
            .field("store_path", &self.store_path)
            .finish()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> SyncConfig {
        SyncConfig::new(
            "https://matrix.example.org",
            UserId::new("@alice:example.org"),
            "syt_secret",
        )
    }

    #[test]
    fn default_timings() {
        let config = config();
        assert_eq!(config.sync_timeout(), Duration::from_secs(30));
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_start(), Duration::from_secs(2));
        assert_eq!(config.retry_max(), Duration::from_secs(300));
        assert!(config.lazy_load_members);
    }

    #[test]
    fn request_timeout_exceeds_poll_timeout() {
        let mut config = config();
        assert_eq!(
            config.request_timeout(Duration::from_secs(30)),
            Duration::from_secs(35)
        );

        config.request_slack_secs = 0;
        assert!(config.request_timeout(Duration::ZERO) > Duration::ZERO);
    }

    #[test]
    fn builders_override_defaults() {
        let config = config()
            .with_sync_timeout(Duration::from_secs(10))
            .with_retry(Duration::from_millis(500), Duration::from_secs(60))
            .with_pending_capacity(3)
            .with_store_path("/tmp/store.db");

        assert_eq!(config.sync_timeout_secs, 10);
        assert_eq!(config.retry_start(), Duration::from_millis(500));
        assert_eq!(config.retry_max(), Duration::from_secs(60));
        assert_eq!(config.pending_capacity, 3);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/store.db")));
    }

    #[test]
    fn debug_redacts_access_token() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("syt_secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn config_from_toml_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
homeserver_url = "https://matrix.example.org"
user_id = "@alice:example.org"
access_token = "t"
sync_timeout_secs = 20
"#
        )
        .unwrap();

        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.user_id, UserId::new("@alice:example.org"));
        assert_eq!(config.sync_timeout_secs, 20);
        assert_eq!(config.probe_timeout_secs, 10);
        assert!(config.store_path.is_none());
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = SyncConfig::from_file(Path::new("/nonexistent/roomsync.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "homeserver_url = ").unwrap();

        let result = SyncConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
