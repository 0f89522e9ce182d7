//! Transport abstraction for roomsync.
//!
//! This module provides a pluggable transport layer that abstracts the
//! homeserver API (reqwest over HTTPS, mock for testing).
//!
//! # Design
//!
//! The transport is request/response, one method per client-server call the
//! engine makes:
//! - `sync()` long-polls for new events
//! - `create_filter()` registers a sync filter
//! - `send()` sends a room event
//! - `messages()` paginates room history
//! - `versions()` is the cheap reachability probe
//!
//! Errors are classified into [`ApiError`] variants so callers can tell
//! connectivity loss from rate limiting from real failures.

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::{MockCall, MockTransport};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use sync_types::{
    ApiError, CreateFilterResponse, Direction, FilterDefinition, MessagesResponse, RoomId,
    SendResponse, SyncResponse, TxnId, UserId, VersionsResponse,
};

/// Parameters of a `/sync` request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncRequest {
    /// Token from the previous response, if any.
    pub since: Option<String>,
    /// Filter id to apply.
    pub filter_id: Option<String>,
    /// Long-poll timeout the server may hold the request for.
    pub timeout: Duration,
    /// Client-side deadline for the whole request.
    pub request_timeout: Option<Duration>,
}

/// Parameters of a `/messages` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesRequest {
    /// Room to paginate.
    pub room_id: RoomId,
    /// Token to start from.
    pub from: String,
    /// Pagination direction.
    pub dir: Direction,
    /// Maximum number of events.
    pub limit: u32,
}

/// Homeserver API used by the engine.
///
/// Implementations handle the underlying HTTP mechanism. Dropping a returned
/// future must cancel the request.
#[async_trait]
pub trait HomeServerApi: Send + Sync + 'static {
    /// `GET /_matrix/client/v3/sync`.
    async fn sync(&self, request: SyncRequest) -> Result<SyncResponse, ApiError>;

    /// `POST /_matrix/client/v3/user/{userId}/filter`.
    async fn create_filter(
        &self,
        user_id: &UserId,
        filter: &FilterDefinition,
    ) -> Result<CreateFilterResponse, ApiError>;

    /// `PUT /_matrix/client/v3/rooms/{roomId}/send/{eventType}/{txnId}`.
    async fn send(
        &self,
        room_id: &RoomId,
        event_type: &str,
        txn_id: &TxnId,
        content: &Value,
    ) -> Result<SendResponse, ApiError>;

    /// `GET /_matrix/client/v3/rooms/{roomId}/messages`.
    ///
    /// The returned chunk is always in chronological order.
    async fn messages(&self, request: MessagesRequest) -> Result<MessagesResponse, ApiError>;

    /// `GET /_matrix/client/versions`.
    async fn versions(&self) -> Result<VersionsResponse, ApiError>;
}
