//! Show the stored session and rooms.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt::Write;
use sync_client::session::{FILTER_ID_KEY, SYNC_TOKEN_KEY};
use sync_client::{Storage, SyncConfig};
use sync_core::RoomSummary;
use sync_types::RoomId;

/// Run the status command.
pub async fn run(config: &SyncConfig) -> Result<()> {
    let path = config
        .store_path
        .as_deref()
        .context("No store configured")?;
    let storage = Storage::open(path)
        .await
        .with_context(|| format!("Failed to open store {}", path.display()))?;
    print!("{}", render(config, &storage).await?);
    Ok(())
}

/// Status report of a store.
pub async fn render(config: &SyncConfig, storage: &Storage) -> Result<String> {
    let mut txn = storage.read_write_txn().await?;
    let token = txn.session().get(&SYNC_TOKEN_KEY.to_string()).await?;
    let filter = txn.session().get(&FILTER_ID_KEY.to_string()).await?;
    let summaries: Vec<RoomSummary> = txn.room_summaries().all().await?;
    let mut pending: BTreeMap<RoomId, (usize, usize)> = BTreeMap::new();
    for event in txn.pending_events().all().await? {
        let counts = pending.entry(event.room_id.clone()).or_default();
        counts.0 += 1;
        if event.error.is_some() {
            counts.1 += 1;
        }
    }
    txn.abort().await;

    let mut out = String::new();
    let _ = writeln!(out, "=== roomsync status ===");
    let _ = writeln!(out);
    let _ = writeln!(out, "Session:");
    let _ = writeln!(out, "  User:       {}", config.user_id);
    let _ = writeln!(out, "  Homeserver: {}", config.homeserver_url);
    let _ = writeln!(out, "  Sync token: {}", token.as_deref().unwrap_or("none (initial sync pending)"));
    let _ = writeln!(out, "  Filter:     {}", filter.as_deref().unwrap_or("none"));
    let _ = writeln!(out);

    if summaries.is_empty() {
        let _ = writeln!(out, "Rooms: none");
        return Ok(out);
    }
    let _ = writeln!(out, "Rooms: {}", summaries.len());
    for summary in &summaries {
        let (queued, failed) = pending.get(&summary.room_id).copied().unwrap_or_default();
        let _ = writeln!(
            out,
            "  {} [{:?}] {}",
            summary.display_name(),
            summary.membership,
            summary.room_id
        );
        let _ = writeln!(
            out,
            "    unread: {} (highlights: {}), pending: {} (failed: {})",
            summary.notification_count, summary.highlight_count, queued, failed
        );
        if let Some(message) = &summary.last_message {
            let _ = writeln!(out, "    last: {}", message);
        }
    }
    Ok(out)
}
