//! Room summaries: the per-room fields a room list shows.
//!
//! Each `apply_*` returns the updated summary only when something changed,
//! so callers write to storage and notify observers only on real changes.

use serde::{Deserialize, Serialize};
use sync_types::events::{ROOM_CANONICAL_ALIAS, ROOM_MESSAGE, ROOM_NAME, ROOM_TOPIC};
use sync_types::{InvitedRoom, JoinedRoom, LeftRoom, RoomEvent, RoomId, UserId};

/// Our membership in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    /// Joined.
    Join,
    /// Invited, not yet joined.
    Invite,
    /// Left, kicked or banned.
    Leave,
}

/// Display fields of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// The room.
    pub room_id: RoomId,
    /// Our membership.
    pub membership: Membership,
    /// `m.room.name`.
    #[serde(default)]
    pub name: Option<String>,
    /// `m.room.canonical_alias`.
    #[serde(default)]
    pub canonical_alias: Option<String>,
    /// `m.room.topic`.
    #[serde(default)]
    pub topic: Option<String>,
    /// Body of the latest message seen in the timeline.
    #[serde(default)]
    pub last_message: Option<String>,
    /// Timestamp of the latest timeline event.
    #[serde(default)]
    pub last_activity_ts: u64,
    /// Unread notifications.
    #[serde(default)]
    pub notification_count: u64,
    /// Unread highlights.
    #[serde(default)]
    pub highlight_count: u64,
    /// Members used for a computed name.
    #[serde(default)]
    pub heroes: Vec<UserId>,
    /// Who invited us, for invited rooms.
    #[serde(default)]
    pub inviter: Option<UserId>,
}

impl RoomSummary {
    /// Empty summary.
    pub fn new(room_id: RoomId, membership: Membership) -> Self {
        Self {
            room_id,
            membership,
            name: None,
            canonical_alias: None,
            topic: None,
            last_message: None,
            last_activity_ts: 0,
            notification_count: 0,
            highlight_count: 0,
            heroes: Vec::new(),
            inviter: None,
        }
    }

    /// Apply a joined room update.
    pub fn apply_joined(&self, update: &JoinedRoom) -> Option<Self> {
        let mut next = self.clone();
        next.membership = Membership::Join;
        next.inviter = None;
        next.apply_events(update.state.events.iter().chain(&update.timeline.events));
        next.notification_count = update.unread_notifications.notification_count;
        next.highlight_count = update.unread_notifications.highlight_count;
        if let Some(heroes) = &update.summary.heroes {
            next.heroes = heroes.clone();
        }
        next.changed_from(self)
    }

    /// Apply an invited room update.
    pub fn apply_invited(&self, update: &InvitedRoom, user_id: &UserId) -> Option<Self> {
        let mut next = self.clone();
        next.membership = Membership::Invite;
        next.inviter = update.inviter(user_id).cloned();
        for event in &update.invite_state.events {
            next.apply_state(&event.event_type, &event.content);
        }
        next.changed_from(self)
    }

    /// Apply a left room update.
    pub fn apply_left(&self, update: &LeftRoom) -> Option<Self> {
        let mut next = self.clone();
        next.membership = Membership::Leave;
        next.inviter = None;
        next.notification_count = 0;
        next.highlight_count = 0;
        next.apply_events(update.state.events.iter().chain(&update.timeline.events));
        next.changed_from(self)
    }

    /// Name to show for the room.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(alias) = self.canonical_alias.as_deref().filter(|a| !a.is_empty()) {
            return alias.to_string();
        }
        match self.heroes.as_slice() {
            [] => self.room_id.to_string(),
            [one] => one.to_string(),
            [first, second] => format!("{} and {}", first, second),
            [first, rest @ ..] => format!("{} and {} others", first, rest.len()),
        }
    }

    fn apply_events<'a>(&mut self, events: impl Iterator<Item = &'a RoomEvent>) {
        for event in events {
            if event.is_state() {
                self.apply_state(&event.event_type, &event.content);
            } else if event.event_type == ROOM_MESSAGE {
                if let Some(body) = event.content_str("body") {
                    self.last_message = Some(body.to_string());
                }
            }
            self.last_activity_ts = self.last_activity_ts.max(event.origin_server_ts);
        }
    }

    fn apply_state(&mut self, event_type: &str, content: &serde_json::Value) {
        let field = |name: &str| {
            content
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        match event_type {
            ROOM_NAME => self.name = field("name"),
            ROOM_TOPIC => self.topic = field("topic"),
            ROOM_CANONICAL_ALIAS => self.canonical_alias = field("alias"),
            _ => {}
        }
    }

    fn changed_from(self, previous: &Self) -> Option<Self> {
        (self != *previous).then_some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room() -> RoomId {
        RoomId::new("!r:example.org")
    }

    fn joined(value: serde_json::Value) -> JoinedRoom {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn joined_update_reads_state_and_messages() {
        let summary = RoomSummary::new(room(), Membership::Join);
        let update = joined(json!({
            "state": {"events": [{
                "event_id": "$n", "type": "m.room.name", "state_key": "",
                "sender": "@a:example.org", "content": {"name": "Lobby"}
            }]},
            "timeline": {"events": [{
                "event_id": "$m", "type": "m.room.message",
                "sender": "@a:example.org", "content": {"body": "hello"},
                "origin_server_ts": 42
            }]},
            "unread_notifications": {"notification_count": 2, "highlight_count": 1}
        }));

        let next = summary.apply_joined(&update).unwrap();
        assert_eq!(next.name.as_deref(), Some("Lobby"));
        assert_eq!(next.last_message.as_deref(), Some("hello"));
        assert_eq!(next.last_activity_ts, 42);
        assert_eq!(next.notification_count, 2);
        assert_eq!(next.highlight_count, 1);
        assert_eq!(next.display_name(), "Lobby");
    }

    #[test]
    fn unchanged_update_returns_none() {
        let summary = RoomSummary::new(room(), Membership::Join);
        assert!(summary.apply_joined(&JoinedRoom::default()).is_none());
    }

    #[test]
    fn invite_records_inviter() {
        let summary = RoomSummary::new(room(), Membership::Invite);
        let update: InvitedRoom = serde_json::from_value(json!({
            "invite_state": {"events": [
                {"type": "m.room.member", "state_key": "@me:example.org",
                 "sender": "@host:example.org", "content": {"membership": "invite"}}
            ]}
        }))
        .unwrap();

        let next = summary
            .apply_invited(&update, &UserId::new("@me:example.org"))
            .unwrap();
        assert_eq!(next.inviter, Some(UserId::new("@host:example.org")));
    }

    #[test]
    fn leave_clears_counters() {
        let mut summary = RoomSummary::new(room(), Membership::Join);
        summary.notification_count = 5;

        let next = summary.apply_left(&LeftRoom::default()).unwrap();
        assert_eq!(next.membership, Membership::Leave);
        assert_eq!(next.notification_count, 0);
    }

    #[test]
    fn display_name_falls_back_to_heroes_then_id() {
        let mut summary = RoomSummary::new(room(), Membership::Join);
        assert_eq!(summary.display_name(), "!r:example.org");

        summary.heroes = vec![
            UserId::new("@a:example.org"),
            UserId::new("@b:example.org"),
            UserId::new("@c:example.org"),
        ];
        assert_eq!(summary.display_name(), "@a:example.org and 2 others");

        summary.canonical_alias = Some("#lobby:example.org".into());
        assert_eq!(summary.display_name(), "#lobby:example.org");
    }
}
