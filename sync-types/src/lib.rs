//! # sync-types
//!
//! Wire types for the Matrix client-server calls made by the roomsync engine.
//!
//! This crate provides the foundational types used across all roomsync crates:
//! - [`RoomId`], [`EventId`], [`UserId`], [`TxnId`] - Identifier newtypes
//! - [`RoomEvent`] - Timeline and state events
//! - [`SyncResponse`] - The `/sync` response tree
//! - [`MessagesResponse`], [`VersionsResponse`], [`SendResponse`] - Other calls
//! - [`ApiError`] - Classified homeserver API errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod api;
mod error;
pub mod events;
mod ids;
mod sync;

pub use api::{
    CreateFilterResponse, Direction, FilterDefinition, MessagesResponse, RoomFilter,
    SendResponse, StateFilter, TimelineFilter, VersionsResponse,
};
pub use error::{ApiError, MatrixErrorBody, M_LIMIT_EXCEEDED};
pub use events::{RoomEvent, StrippedStateEvent, Unsigned};
pub use ids::{EventId, RoomId, TxnId, UserId};
pub use sync::{
    InviteState, InvitedRoom, JoinedRoom, LeftRoom, RoomSummaryFields, Rooms, StateEvents,
    SyncResponse, Timeline, UnreadNotifications,
};
