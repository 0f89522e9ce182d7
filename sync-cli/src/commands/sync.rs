//! Run the engine until interrupted.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use sync_client::{HomeServerApi, SyncClient, SyncConfig, SyncStatus};
use tracing::{info, warn};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);

/// Run the sync command.
pub async fn run(config: SyncConfig) -> Result<()> {
    let client = SyncClient::connect(config)
        .await
        .context("Failed to open the sync client")?;
    client.start();

    let mut sync_status = client.sync_status();
    let mut connection = client.connection_status();
    let mut summaries = tokio::time::interval(SUMMARY_INTERVAL);
    let mut logged_token = None;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            changed = sync_status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let status = *sync_status.borrow_and_update();
                info!(%status, "sync status");
                if status != SyncStatus::Stopped {
                    continue;
                }
                if let Some(error) = client.last_sync_error() {
                    if !error.is_connection() {
                        break Err(anyhow!("sync halted: {}", error));
                    }
                    warn!(%error, "sync paused until the homeserver is reachable");
                }
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let status = *connection.borrow_and_update();
                info!(%status, retry_in_ms = client.retry_in().as_millis() as u64, "connection status");
            }
            _ = summaries.tick() => {
                let token = client.sync_token();
                if token != logged_token {
                    log_rooms(&client);
                    logged_token = token;
                }
            }
        }
    };

    client.stop();
    result
}

fn log_rooms<A: HomeServerApi>(client: &SyncClient<A>) {
    for room in client.rooms() {
        let summary = room.summary();
        info!(
            room_id = %summary.room_id,
            name = %summary.display_name(),
            membership = ?summary.membership,
            unread = summary.notification_count,
            highlights = summary.highlight_count,
            last_message = summary.last_message.as_deref().unwrap_or(""),
            pending = room.send_queue().pending().len(),
            "room"
        );
    }
}
