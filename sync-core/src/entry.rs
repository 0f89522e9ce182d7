//! Timeline entries.

use crate::sort_key::SortKey;
use serde::{Deserialize, Serialize};
use sync_types::{EventId, RoomEvent, RoomId};

/// A hole in the timeline that can be filled with `/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gap {
    /// Older events are missing before this point.
    Backward {
        /// Token to paginate backwards from.
        prev_batch: String,
    },
    /// Newer events are missing after this point.
    Forward {
        /// Token to paginate forwards from.
        next_batch: String,
    },
}

impl Gap {
    /// The pagination token of this gap.
    pub fn token(&self) -> &str {
        match self {
            Gap::Backward { prev_batch } => prev_batch,
            Gap::Forward { next_batch } => next_batch,
        }
    }

    /// Whether filling this gap walks towards older events.
    pub fn is_backward(&self) -> bool {
        matches!(self, Gap::Backward { .. })
    }

    /// A gap of the same kind carrying another token.
    pub fn with_token(&self, token: String) -> Gap {
        match self {
            Gap::Backward { .. } => Gap::Backward { prev_batch: token },
            Gap::Forward { .. } => Gap::Forward { next_batch: token },
        }
    }
}

/// What a timeline entry holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryContent {
    /// A room event.
    Event(RoomEvent),
    /// A gap marker.
    Gap(Gap),
}

/// One position in a room timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Room the entry belongs to.
    pub room_id: RoomId,
    /// Position of the entry.
    pub sort_key: SortKey,
    /// Event or gap.
    pub content: EntryContent,
}

impl TimelineEntry {
    /// Create an event entry.
    pub fn event(room_id: RoomId, sort_key: SortKey, event: RoomEvent) -> Self {
        Self {
            room_id,
            sort_key,
            content: EntryContent::Event(event),
        }
    }

    /// Create a gap entry.
    pub fn gap(room_id: RoomId, sort_key: SortKey, gap: Gap) -> Self {
        Self {
            room_id,
            sort_key,
            content: EntryContent::Gap(gap),
        }
    }

    /// The event, if this is an event entry.
    pub fn as_event(&self) -> Option<&RoomEvent> {
        match &self.content {
            EntryContent::Event(event) => Some(event),
            EntryContent::Gap(_) => None,
        }
    }

    /// The gap, if this is a gap entry.
    pub fn as_gap(&self) -> Option<&Gap> {
        match &self.content {
            EntryContent::Gap(gap) => Some(gap),
            EntryContent::Event(_) => None,
        }
    }

    /// Event id of an event entry.
    pub fn event_id(&self) -> Option<&EventId> {
        self.as_event().map(|e| &e.event_id)
    }

    /// The same entry at another position.
    pub fn moved_to(&self, sort_key: SortKey) -> Self {
        Self {
            sort_key,
            ..self.clone()
        }
    }
}
