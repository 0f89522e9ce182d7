//! `/sync` response types.

use crate::events::{RoomEvent, StrippedStateEvent};
use crate::ids::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response of `GET /_matrix/client/v3/sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Token to pass as `since` on the next request.
    pub next_batch: String,
    /// Room updates, by membership.
    #[serde(default)]
    pub rooms: Rooms,
}

/// Room updates in a sync response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rooms {
    /// Rooms the user is joined to.
    #[serde(default)]
    pub join: BTreeMap<RoomId, JoinedRoom>,
    /// Rooms the user is invited to.
    #[serde(default)]
    pub invite: BTreeMap<RoomId, InvitedRoom>,
    /// Rooms the user has left or been removed from.
    #[serde(default)]
    pub leave: BTreeMap<RoomId, LeftRoom>,
}

impl Rooms {
    /// Whether the response carries no room updates at all.
    pub fn is_empty(&self) -> bool {
        self.join.is_empty() && self.invite.is_empty() && self.leave.is_empty()
    }
}

/// Update for a joined room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedRoom {
    /// State updates preceding the timeline.
    #[serde(default)]
    pub state: StateEvents,
    /// Timeline slice.
    #[serde(default)]
    pub timeline: Timeline,
    /// Unread counters.
    #[serde(default)]
    pub unread_notifications: UnreadNotifications,
    /// Room summary fields used for display names.
    #[serde(default)]
    pub summary: RoomSummaryFields,
}

/// Update for an invited room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvitedRoom {
    /// Stripped state visible to invitees.
    #[serde(default)]
    pub invite_state: InviteState,
}

impl InvitedRoom {
    /// Find the sender of our own invite membership event.
    pub fn inviter(&self, user_id: &UserId) -> Option<&UserId> {
        self.invite_state
            .events
            .iter()
            .find(|e| {
                e.event_type == crate::events::ROOM_MEMBER && e.state_key == user_id.as_str()
            })
            .map(|e| &e.sender)
    }
}

/// Update for a left room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeftRoom {
    /// State updates preceding the timeline.
    #[serde(default)]
    pub state: StateEvents,
    /// Timeline slice up to the leave.
    #[serde(default)]
    pub timeline: Timeline,
}

/// A list of state events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateEvents {
    /// The events.
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

/// A list of stripped state events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InviteState {
    /// The events.
    #[serde(default)]
    pub events: Vec<StrippedStateEvent>,
}

/// Timeline slice of a room in a sync response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Events in chronological order.
    #[serde(default)]
    pub events: Vec<RoomEvent>,
    /// True when events were omitted between the previous sync and this slice.
    #[serde(default)]
    pub limited: bool,
    /// Token for paginating backwards from the start of this slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

/// Unread notification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadNotifications {
    /// Number of unread notifications.
    #[serde(default)]
    pub notification_count: u64,
    /// Number of unread highlights.
    #[serde(default)]
    pub highlight_count: u64,
}

/// The `summary` block of a joined room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummaryFields {
    /// Members to use for a computed display name.
    #[serde(rename = "m.heroes", default, skip_serializing_if = "Option::is_none")]
    pub heroes: Option<Vec<UserId>>,
    /// Joined member count.
    #[serde(
        rename = "m.joined_member_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub joined_member_count: Option<u64>,
    /// Invited member count.
    #[serde(
        rename = "m.invited_member_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub invited_member_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_response() {
        let response: SyncResponse = serde_json::from_value(json!({
            "next_batch": "s1"
        }))
        .unwrap();
        assert_eq!(response.next_batch, "s1");
        assert!(response.rooms.is_empty());
    }

    #[test]
    fn parses_joined_room_with_limited_timeline() {
        let response: SyncResponse = serde_json::from_value(json!({
            "next_batch": "s2",
            "rooms": {
                "join": {
                    "!r:example.org": {
                        "timeline": {
                            "events": [{
                                "event_id": "$1",
                                "type": "m.room.message",
                                "sender": "@a:example.org",
                                "content": {"body": "hello"}
                            }],
                            "limited": true,
                            "prev_batch": "p1"
                        },
                        "unread_notifications": {"notification_count": 3},
                        "summary": {"m.heroes": ["@b:example.org"]}
                    }
                }
            }
        }))
        .unwrap();

        let room = &response.rooms.join[&RoomId::new("!r:example.org")];
        assert!(room.timeline.limited);
        assert_eq!(room.timeline.prev_batch.as_deref(), Some("p1"));
        assert_eq!(room.timeline.events.len(), 1);
        assert_eq!(room.unread_notifications.notification_count, 3);
        assert_eq!(
            room.summary.heroes,
            Some(vec![UserId::new("@b:example.org")])
        );
    }

    #[test]
    fn finds_inviter() {
        let invited: InvitedRoom = serde_json::from_value(json!({
            "invite_state": {"events": [
                {"type": "m.room.name", "state_key": "", "sender": "@c:example.org",
                 "content": {"name": "Lobby"}},
                {"type": "m.room.member", "state_key": "@me:example.org",
                 "sender": "@c:example.org", "content": {"membership": "invite"}}
            ]}
        }))
        .unwrap();

        assert_eq!(
            invited.inviter(&UserId::new("@me:example.org")),
            Some(&UserId::new("@c:example.org"))
        );
    }
}
