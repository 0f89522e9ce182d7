//! Room event types.

use crate::ids::{EventId, TxnId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type of plain room messages.
pub const ROOM_MESSAGE: &str = "m.room.message";
/// Event type of the room name state event.
pub const ROOM_NAME: &str = "m.room.name";
/// Event type of the room topic state event.
pub const ROOM_TOPIC: &str = "m.room.topic";
/// Event type of the canonical alias state event.
pub const ROOM_CANONICAL_ALIAS: &str = "m.room.canonical_alias";
/// Event type of membership state events.
pub const ROOM_MEMBER: &str = "m.room.member";

/// A room event as delivered in sync timelines and `/messages` chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    /// Server-assigned event id.
    pub event_id: EventId,
    /// Event type, e.g. `m.room.message`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Sender of the event.
    pub sender: UserId,
    /// Event content (schema depends on the type).
    #[serde(default)]
    pub content: Value,
    /// Present on state events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// Origin server timestamp in milliseconds.
    #[serde(default)]
    pub origin_server_ts: u64,
    /// Data added by the homeserver.
    #[serde(default, skip_serializing_if = "Unsigned::is_empty")]
    pub unsigned: Unsigned,
}

impl RoomEvent {
    /// Whether this is a state event.
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// The transaction id this event was sent with, if it is our own echo.
    pub fn transaction_id(&self) -> Option<&TxnId> {
        self.unsigned.transaction_id.as_ref()
    }

    /// Read a string field from the content.
    pub fn content_str(&self, field: &str) -> Option<&str> {
        self.content.get(field).and_then(Value::as_str)
    }
}

/// Unsigned event data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unsigned {
    /// Transaction id of the send, only visible to the sending device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TxnId>,
}

impl Unsigned {
    fn is_empty(&self) -> bool {
        self.transaction_id.is_none()
    }
}

/// Stripped state event, as found in `invite_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrippedStateEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// State key.
    #[serde(default)]
    pub state_key: String,
    /// Sender of the event.
    pub sender: UserId,
    /// Event content.
    #[serde(default)]
    pub content: Value,
}
