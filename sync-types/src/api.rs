//! Request and response types for the non-sync calls the engine makes.

use crate::events::RoomEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pagination direction for `/messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Towards older events.
    #[serde(rename = "b")]
    Backward,
    /// Towards newer events.
    #[serde(rename = "f")]
    Forward,
}

impl Direction {
    /// Query parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Backward => "b",
            Direction::Forward => "f",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of `GET /rooms/{roomId}/messages`.
///
/// Transports normalize `chunk` into chronological order regardless of the
/// requested direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Token the page starts at (equals the `from` of the request).
    pub start: String,
    /// Token to continue paginating from. Absent at the edge of history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Page of events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<Vec<RoomEvent>>,
}

/// Response of `GET /_matrix/client/versions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionsResponse {
    /// Supported client-server API versions, e.g. `v1.11`.
    #[serde(default)]
    pub versions: Vec<String>,
}

/// Response of `PUT /rooms/{roomId}/send/{eventType}/{txnId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// Server-assigned id of the sent event.
    pub event_id: crate::ids::EventId,
}

/// Response of `POST /user/{userId}/filter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFilterResponse {
    /// Id to pass as `filter` on sync requests.
    pub filter_id: String,
}

/// The subset of a Matrix filter definition the engine uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    /// Room filter.
    #[serde(default)]
    pub room: RoomFilter,
}

/// Room part of a filter definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFilter {
    /// State event filter.
    #[serde(default)]
    pub state: StateFilter,
    /// Timeline event filter.
    #[serde(default)]
    pub timeline: TimelineFilter,
}

/// State filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFilter {
    /// Only send membership events for senders of timeline events.
    #[serde(default)]
    pub lazy_load_members: bool,
}

/// Timeline filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineFilter {
    /// Maximum number of events per room timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl FilterDefinition {
    /// Filter with lazy loading of room members enabled.
    pub fn lazy_load_members() -> Self {
        Self {
            room: RoomFilter {
                state: StateFilter {
                    lazy_load_members: true,
                },
                timeline: TimelineFilter::default(),
            },
        }
    }

    /// Set the timeline limit.
    pub fn with_timeline_limit(mut self, limit: u32) -> Self {
        self.room.timeline.limit = Some(limit);
        self
    }
}
