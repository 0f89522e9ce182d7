//! A room: summary, timeline and outbound queue.

mod persister;
mod timeline;

pub use persister::{RoomPersister, TimelineChanges, TimelineWriter};
pub use timeline::RoomTimeline;

use crate::error::ClientError;
use crate::scheduler::RequestScheduler;
use crate::send_queue::SendQueue;
use crate::storage::{Storage, Transaction};
use crate::transport::{HomeServerApi, MessagesRequest};
use crate::util::lock;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use sync_core::{Fragment, Membership, PendingEvent, RoomSummary, SortKey, TimelineEntry, TimelineError};
use sync_types::events::ROOM_MESSAGE;
use sync_types::{Direction, InvitedRoom, JoinedRoom, LeftRoom, RoomEvent, RoomId, TxnId, UserId};
use tracing::{debug, trace};

/// One room's part of a sync response.
#[derive(Debug, Clone, Copy)]
pub enum RoomUpdate<'a> {
    /// Room under `rooms.join`.
    Joined(&'a JoinedRoom),
    /// Room under `rooms.invite`.
    Invited(&'a InvitedRoom),
    /// Room under `rooms.leave`.
    Left(&'a LeftRoom),
}

impl RoomUpdate<'_> {
    /// Membership the update implies.
    pub fn membership(&self) -> Membership {
        match self {
            RoomUpdate::Joined(_) => Membership::Join,
            RoomUpdate::Invited(_) => Membership::Invite,
            RoomUpdate::Left(_) => Membership::Leave,
        }
    }
}

/// Writes of one room in a sync transaction, to apply after commit.
#[derive(Debug, Clone, Default)]
pub struct RoomSyncChanges {
    /// New summary, if it changed.
    pub summary: Option<RoomSummary>,
    /// Timeline writes.
    pub timeline: Option<TimelineChanges>,
    /// Transaction ids of our own events that came back.
    pub echoes: Vec<TxnId>,
}

/// Limits applied to every room.
#[derive(Debug, Clone, Copy)]
pub struct RoomLimits {
    /// Maximum pending events per room.
    pub pending_capacity: usize,
    /// Events requested per gap fill.
    pub pagination_limit: u32,
}

/// Stored data of one room, as loaded at startup.
#[derive(Debug, Default)]
pub struct StoredRoom {
    /// Fragments.
    pub fragments: Vec<Fragment>,
    /// Timeline entries.
    pub entries: Vec<TimelineEntry>,
    /// Unacknowledged events.
    pub pending: Vec<PendingEvent>,
}

/// A room known to the session.
pub struct Room<A: HomeServerApi> {
    room_id: RoomId,
    storage: Storage,
    scheduler: RequestScheduler<A>,
    limits: RoomLimits,
    summary: Mutex<RoomSummary>,
    persister: Mutex<RoomPersister>,
    timeline: RoomTimeline,
    send_queue: Arc<SendQueue<A>>,
}

impl<A: HomeServerApi> Room<A> {
    /// A room first seen in a sync response.
    pub fn new(
        room_id: RoomId,
        membership: Membership,
        storage: Storage,
        scheduler: RequestScheduler<A>,
        limits: RoomLimits,
    ) -> Self {
        Self::restore(
            RoomSummary::new(room_id, membership),
            StoredRoom::default(),
            storage,
            scheduler,
            limits,
        )
    }

    /// A room loaded from storage.
    pub fn restore(
        summary: RoomSummary,
        stored: StoredRoom,
        storage: Storage,
        scheduler: RequestScheduler<A>,
        limits: RoomLimits,
    ) -> Self {
        let room_id = summary.room_id.clone();
        let persister = RoomPersister::restore(room_id.clone(), stored.fragments, &stored.entries);
        let timeline = RoomTimeline::new(stored.entries, persister.fragments());
        let send_queue = SendQueue::new(
            room_id.clone(),
            storage.clone(),
            scheduler.clone(),
            limits.pending_capacity,
            stored.pending,
        );
        Self {
            room_id,
            storage,
            scheduler,
            limits,
            summary: Mutex::new(summary),
            persister: Mutex::new(persister),
            timeline,
            send_queue,
        }
    }

    /// Room id.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Current summary.
    pub fn summary(&self) -> RoomSummary {
        lock(&self.summary).clone()
    }

    /// Timeline view.
    pub fn timeline(&self) -> &RoomTimeline {
        &self.timeline
    }

    /// Outbound queue.
    pub fn send_queue(&self) -> &Arc<SendQueue<A>> {
        &self.send_queue
    }

    /// Queue an event for sending.
    pub async fn send_event(&self, event_type: &str, content: Value) -> Result<PendingEvent, ClientError> {
        self.send_queue.enqueue_event(event_type, content).await
    }

    /// Queue a plain text message.
    pub async fn send_text(&self, body: &str) -> Result<PendingEvent, ClientError> {
        self.send_event(ROOM_MESSAGE, json!({"msgtype": "m.text", "body": body}))
            .await
    }

    /// Write this room's part of a sync response.
    ///
    /// Nothing in memory changes until [`after_sync`](Self::after_sync).
    pub async fn write_sync(
        &self,
        txn: &mut Transaction,
        update: RoomUpdate<'_>,
        since: Option<&str>,
        user_id: &UserId,
    ) -> Result<RoomSyncChanges, ClientError> {
        let mut changes = RoomSyncChanges::default();

        let current = self.summary();
        let updated = match update {
            RoomUpdate::Joined(joined) => current.apply_joined(joined),
            RoomUpdate::Invited(invited) => current.apply_invited(invited, user_id),
            RoomUpdate::Left(left) => current.apply_left(left),
        };
        let first_write = txn.room_summaries().get(&self.room_id).await?.is_none();
        changes.summary = match updated {
            Some(summary) => Some(summary),
            None if first_write => Some(current),
            None => None,
        };
        if let Some(summary) = &changes.summary {
            txn.room_summaries().set(&self.room_id, summary).await?;
        }

        let (state, timeline) = match update {
            RoomUpdate::Joined(joined) => (joined.state.events.as_slice(), Some(&joined.timeline)),
            RoomUpdate::Left(left) => (left.state.events.as_slice(), Some(&left.timeline)),
            RoomUpdate::Invited(_) => (&[][..], None),
        };
        let timeline_state = timeline
            .into_iter()
            .flat_map(|t| t.events.iter())
            .filter(|e| e.is_state());
        for event in state.iter().chain(timeline_state) {
            self.write_state(txn, event).await?;
        }

        if let Some(timeline) = timeline {
            let writer = lock(&self.persister).writer();
            changes.timeline = Some(writer.persist_sync(txn, timeline, since).await?);
            changes.echoes = self.remove_echoes(txn, &timeline.events).await?;
        }
        Ok(changes)
    }

    /// Take over committed sync changes and notify observers.
    pub fn after_sync(&self, changes: RoomSyncChanges) {
        if let Some(summary) = changes.summary {
            *lock(&self.summary) = summary;
        }
        if let Some(timeline) = &changes.timeline {
            let mut persister = lock(&self.persister);
            persister.apply(timeline);
            self.timeline.apply(timeline, persister.fragments());
        }
        if !changes.echoes.is_empty() {
            self.send_queue.apply_remote_echoes(&changes.echoes);
        }
    }

    /// Fetch the events behind the gap at `gap_key` and write them.
    pub async fn fill_gap(&self, gap_key: SortKey) -> Result<TimelineChanges, ClientError> {
        let entry = {
            let persister = lock(&self.persister);
            self.timeline.get(&gap_key, persister.fragments())
        }
        .ok_or(ClientError::UnknownEntry(gap_key))?;
        let gap = entry
            .as_gap()
            .cloned()
            .ok_or(TimelineError::NotAGap(gap_key))?;

        let request = MessagesRequest {
            room_id: self.room_id.clone(),
            from: gap.token().to_string(),
            dir: if gap.is_backward() {
                Direction::Backward
            } else {
                Direction::Forward
            },
            limit: self.limits.pagination_limit,
        };
        debug!(room_id = %self.room_id, gap = %gap_key, dir = %request.dir, "filling gap");
        let response = self.scheduler.messages(request).response().await?;

        let writer = lock(&self.persister).writer();
        let mut txn = self.storage.read_write_txn().await?;
        let changes = match writer
            .persist_gap_fill(&mut txn, gap_key, &gap, &response)
            .await
        {
            Ok(changes) => changes,
            Err(error) => {
                txn.abort().await;
                return Err(error);
            }
        };
        txn.complete().await?;

        let persister = lock(&self.persister);
        self.timeline.apply(&changes, persister.fragments());
        Ok(changes)
    }

    async fn write_state(&self, txn: &mut Transaction, event: &RoomEvent) -> Result<(), ClientError> {
        let state_key = event.state_key.clone().unwrap_or_default();
        trace!(room_id = %self.room_id, event_type = %event.event_type, %state_key, "state event");
        txn.room_state()
            .set(
                &(self.room_id.clone(), event.event_type.clone(), state_key),
                event,
            )
            .await?;
        Ok(())
    }

    /// Drop stored pending events whose echo is among `events`.
    async fn remove_echoes(
        &self,
        txn: &mut Transaction,
        events: &[RoomEvent],
    ) -> Result<Vec<TxnId>, ClientError> {
        let mut echoes = Vec::new();
        let mut txn_ids = events.iter().filter_map(RoomEvent::transaction_id).peekable();
        if txn_ids.peek().is_none() {
            return Ok(echoes);
        }
        let mut store = txn.pending_events();
        let stored = store.in_room(&self.room_id).await?;
        for txn_id in txn_ids {
            if let Some(pending) = stored.iter().find(|p| &p.txn_id == txn_id) {
                store
                    .remove(&(self.room_id.clone(), pending.queue_index))
                    .await?;
                echoes.push(txn_id.clone());
            }
        }
        Ok(echoes)
    }
}
