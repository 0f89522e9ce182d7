//! Builders shared by the unit tests.

use serde_json::json;
use std::time::Duration;
use sync_types::{
    JoinedRoom, MessagesResponse, RoomEvent, RoomId, SyncResponse, Timeline, TxnId, UserId,
};

pub(crate) fn room() -> RoomId {
    RoomId::new("!room:example.org")
}

pub(crate) fn me() -> UserId {
    UserId::new("@me:example.org")
}

pub(crate) fn event(id: &str) -> RoomEvent {
    serde_json::from_value(json!({
        "event_id": id,
        "type": "m.room.message",
        "sender": "@other:example.org",
        "content": {"msgtype": "m.text", "body": id},
        "origin_server_ts": 1_000
    }))
    .unwrap()
}

/// Our own message coming back through sync.
pub(crate) fn echo(id: &str, txn_id: &TxnId) -> RoomEvent {
    let mut event = event(id);
    event.sender = me();
    event.unsigned.transaction_id = Some(txn_id.clone());
    event
}

pub(crate) fn messages(start: &str, end: Option<&str>, ids: &[&str]) -> MessagesResponse {
    MessagesResponse {
        start: start.into(),
        end: end.map(str::to_string),
        chunk: Some(ids.iter().map(|id| event(id)).collect()),
    }
}

/// A sync response with one joined room.
pub(crate) fn joined_sync(next_batch: &str, events: Vec<RoomEvent>, prev_batch: Option<&str>) -> SyncResponse {
    let mut response = SyncResponse {
        next_batch: next_batch.into(),
        ..SyncResponse::default()
    };
    response.rooms.join.insert(
        room(),
        JoinedRoom {
            timeline: Timeline {
                events,
                limited: prev_batch.is_some(),
                prev_batch: prev_batch.map(str::to_string),
            },
            ..JoinedRoom::default()
        },
    );
    response
}

/// Poll `check` until it holds. Fails the test after five seconds.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within 5s");
}
