//! Send a text message and wait for its remote echo.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use sync_client::{HomeServerApi, PendingEvent, SyncClient, SyncConfig, SyncStatus};
use sync_types::{RoomId, TxnId};
use tokio::sync::broadcast::error::RecvError;

/// Run the send command.
pub async fn run(config: SyncConfig, room_id: RoomId, message: &str, timeout: Duration) -> Result<()> {
    let client = SyncClient::connect(config)
        .await
        .context("Failed to open the sync client")?;
    client.start();

    let result = tokio::time::timeout(timeout, send_and_wait(&client, &room_id, message)).await;
    client.stop();

    match result {
        Ok(outcome) => outcome,
        Err(_) => bail!("No remote echo within {} seconds", timeout.as_secs()),
    }
}

async fn send_and_wait<A: HomeServerApi>(
    client: &SyncClient<A>,
    room_id: &RoomId,
    message: &str,
) -> Result<()> {
    // The room is only known after the first sync.
    let mut status = client.sync_status();
    while *status.borrow_and_update() != SyncStatus::Syncing {
        status.changed().await.context("Sync loop gone")?;
        if let Some(error) = client.last_sync_error() {
            if !error.is_connection() {
                bail!("Sync failed: {}", error);
            }
        }
    }

    let pending = client
        .send_message(room_id, message)
        .await
        .with_context(|| format!("Failed to queue message for {}", room_id))?;
    println!("Queued {} in {}", pending.txn_id, room_id);

    let room = client
        .room(room_id)
        .with_context(|| format!("Unknown room {}", room_id))?;
    let queue = room.send_queue().pending();
    let (_, mut changes) = queue.subscribe();
    let mut announced = false;
    loop {
        let snapshot = queue.snapshot();
        let Some(event) = find(&snapshot, &pending.txn_id) else {
            break;
        };
        if let Some(error) = &event.error {
            bail!("Homeserver rejected the message: {}", error);
        }
        if let (false, Some(remote_id)) = (announced, &event.remote_id) {
            println!("Sent as {}", remote_id);
            announced = true;
        }
        match changes.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => bail!("Send queue closed"),
        }
    }

    println!("Remote echo received");
    Ok(())
}

fn find<'a>(events: &'a [PendingEvent], txn_id: &TxnId) -> Option<&'a PendingEvent> {
    events.iter().find(|e| &e.txn_id == txn_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_client::MockTransport;
    use sync_types::{ApiError, JoinedRoom, SyncResponse, UserId};

    fn room() -> RoomId {
        RoomId::new("!room:example.org")
    }

    async fn client(mock: &MockTransport) -> SyncClient<MockTransport> {
        let mut response = SyncResponse {
            next_batch: "s1".into(),
            ..SyncResponse::default()
        };
        response.rooms.join.insert(room(), JoinedRoom::default());
        mock.queue_sync(Ok(response));

        let config = SyncConfig::new(
            "https://matrix.example.org",
            UserId::new("@me:example.org"),
            "secret",
        );
        let client = SyncClient::new(config, mock.clone()).await.unwrap();
        client.start();
        client
    }

    #[tokio::test]
    async fn rejected_message_is_an_error() {
        let mock = MockTransport::new();
        mock.queue_send(Err(ApiError::Server {
            status: 403,
            errcode: "M_FORBIDDEN".into(),
            message: "not a member".into(),
        }));
        let client = client(&mock).await;

        let error = send_and_wait(&client, &room(), "hi").await.unwrap_err();
        assert!(error.to_string().contains("rejected"));
        client.stop();
    }

    #[tokio::test]
    async fn unknown_room_is_an_error() {
        let mock = MockTransport::new();
        let client = client(&mock).await;

        let error = send_and_wait(&client, &RoomId::new("!other:example.org"), "hi")
            .await
            .unwrap_err();
        assert!(error.to_string().contains("!other:example.org"));
        client.stop();
    }
}
