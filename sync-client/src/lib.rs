//! # roomsync-client
//!
//! Client sync engine for Matrix homeservers.
//!
//! ## Features
//!
//! - **Sync loop**: initial, catch-up and long-poll `/sync`, each response
//!   committed in one storage transaction before it becomes visible
//! - **Send queue**: per-room FIFO of locally authored events that survives
//!   restarts and waits for the remote echo
//! - **Timeline gaps**: fragments and gaps that `/messages` fills from
//!   either side
//! - **Reconnection**: probes `/versions` with exponential backoff after a
//!   connection loss and resumes syncing and sending
//! - **Transport abstraction**: [`HomeServerApi`] with HTTP and mock
//!   implementations
//!
//! ## Example
//!
//! ```ignore
//! use roomsync_client::{SyncClient, SyncConfig};
//!
//! let config = SyncConfig::from_file(Path::new("roomsync.toml"))?;
//! let client = SyncClient::connect(config).await?;
//! client.start();
//!
//! client.send_message(&room_id, "hello").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod observable;
pub mod reconnector;
pub mod retry;
pub mod room;
pub mod scheduler;
pub mod send_queue;
pub mod session;
pub mod storage;
pub mod sync_loop;
pub mod transport;
mod util;

#[cfg(test)]
mod test_support;

pub use client::SyncClient;
pub use config::{ConfigError, SyncConfig};
pub use error::ClientError;
pub use observable::{ListChange, ObservableList};
pub use reconnector::Reconnector;
pub use retry::{ExponentialRetryDelay, RetryAborted};
pub use room::{Room, RoomTimeline, TimelineChanges};
pub use scheduler::{AbortHandle, Abortable, RequestScheduler};
pub use send_queue::SendQueue;
pub use session::Session;
pub use storage::{Storage, StorageError, Transaction};
pub use sync_loop::{SyncLoop, SyncSettings};
pub use transport::{HomeServerApi, HttpTransport, MessagesRequest, MockTransport, SyncRequest};

pub use sync_core::{ConnectionStatus, PendingEvent, SyncStatus};
