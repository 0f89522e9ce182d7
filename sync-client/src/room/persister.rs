//! Writes timeline changes of one room to storage.
//!
//! Planning happens in sync-core; the persister feeds the planners the
//! stored neighborhood and applies their plans inside the caller's
//! transaction. In-memory state changes only in [`RoomPersister::apply`],
//! after the transaction committed.

use crate::error::ClientError;
use crate::storage::Transaction;
use std::collections::HashSet;
use sync_core::{
    plan_gap_fill, plan_sync_timeline, Fragment, FragmentIndex, Gap, LivePosition, Relocation,
    SortKey, TimelineEntry, TimelineError,
};
use sync_types::{MessagesResponse, RoomId, Timeline};
use tracing::debug;

/// Timeline writes of one transaction, to apply after commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineChanges {
    /// Fragments created or relinked.
    pub fragments: Vec<Fragment>,
    /// Entries added, in timeline order for sync and moving away from the
    /// gap for gap fills.
    pub added: Vec<TimelineEntry>,
    /// Keys removed.
    pub removed: Vec<SortKey>,
    /// A stored entry moved to a new key.
    pub relocated: Option<Relocation>,
    /// New live position.
    pub live: Option<LivePosition>,
}

impl TimelineChanges {
    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.relocated.is_none()
    }
}

/// Timeline persistence for one room.
#[derive(Debug)]
pub struct RoomPersister {
    room_id: RoomId,
    live: Option<LivePosition>,
    fragments: FragmentIndex,
}

impl RoomPersister {
    /// Persister of a room with no stored timeline.
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            live: None,
            fragments: FragmentIndex::default(),
        }
    }

    /// Rebuild from stored fragments and entries.
    pub fn restore(room_id: RoomId, fragments: Vec<Fragment>, entries: &[TimelineEntry]) -> Self {
        let fragments = FragmentIndex::new(fragments);
        let live = fragments.live_fragment().map(|fragment| LivePosition {
            fragment: fragment.clone(),
            last_key: entries
                .iter()
                .map(|e| e.sort_key)
                .filter(|k| k.fragment_key() == fragment.id)
                .max(),
        });
        Self {
            room_id,
            live,
            fragments,
        }
    }

    /// Fragment ordering of the room.
    pub fn fragments(&self) -> &FragmentIndex {
        &self.fragments
    }

    /// The live end of the timeline.
    pub fn live(&self) -> Option<&LivePosition> {
        self.live.as_ref()
    }

    /// Writer for the next transaction, detached from this persister.
    pub fn writer(&self) -> TimelineWriter {
        TimelineWriter {
            room_id: self.room_id.clone(),
            live: self.live.clone(),
        }
    }

    /// Take over committed changes.
    pub fn apply(&mut self, changes: &TimelineChanges) {
        for fragment in &changes.fragments {
            self.fragments.upsert(fragment.clone());
        }
        if let Some(live) = &changes.live {
            self.live = Some(live.clone());
        }
    }
}

/// Writes timeline changes inside a transaction.
///
/// Carries the room and its live end as of creation, so no lock on the
/// persister is held across storage calls.
#[derive(Debug, Clone)]
pub struct TimelineWriter {
    room_id: RoomId,
    live: Option<LivePosition>,
}

impl TimelineWriter {
    /// Write the sync timeline of this room.
    pub async fn persist_sync(
        &self,
        txn: &mut Transaction,
        timeline: &Timeline,
        since: Option<&str>,
    ) -> Result<TimelineChanges, ClientError> {
        let plan = plan_sync_timeline(&self.room_id, self.live.as_ref(), timeline, since)?;

        for fragment in &plan.fragments {
            txn.timeline_fragments()
                .set(&(self.room_id.clone(), fragment.id), fragment)
                .await?;
        }
        for entry in &plan.entries {
            txn.timeline_entries()
                .add(&(self.room_id.clone(), entry.sort_key), entry)
                .await?;
        }

        Ok(TimelineChanges {
            fragments: plan.fragments,
            added: plan.entries,
            removed: Vec::new(),
            relocated: None,
            live: plan.live,
        })
    }

    /// Stored entries on the far side of a gap, nearest first, up to and
    /// including the first event.
    ///
    /// Follows fragment links from storage, so a fill sees fragments
    /// committed by a sync whose in-memory apply has not run yet.
    async fn far_side(
        &self,
        txn: &mut Transaction,
        gap_key: SortKey,
        backward: bool,
    ) -> Result<Vec<TimelineEntry>, ClientError> {
        let mut found = Vec::new();
        let mut visited = HashSet::new();
        let mut fragment = Some(gap_key.fragment_key());
        let mut from = Some(gap_key.event_key());

        while let Some(id) = fragment.filter(|id| visited.insert(*id)) {
            let entries = txn
                .timeline_entries()
                .toward_event(&self.room_id, id, from, backward)
                .await?;
            let reached_event = entries.iter().any(|e| e.as_event().is_some());
            found.extend(entries);
            if reached_event {
                break;
            }
            let stored = txn
                .timeline_fragments()
                .get(&(self.room_id.clone(), id))
                .await?;
            fragment = stored.and_then(|f| if backward { f.previous_id } else { f.next_id });
            from = None;
        }
        Ok(found)
    }

    /// Fill the gap at `gap_key` with a `/messages` response.
    ///
    /// `expected` is the gap the request was made for. Fails with
    /// [`TimelineError::StaleGap`] when the stored entry no longer matches.
    pub async fn persist_gap_fill(
        &self,
        txn: &mut Transaction,
        gap_key: SortKey,
        expected: &Gap,
        response: &MessagesResponse,
    ) -> Result<TimelineChanges, ClientError> {
        let gap_entry = txn
            .timeline_entries()
            .get(&(self.room_id.clone(), gap_key))
            .await?
            .ok_or(ClientError::UnknownEntry(gap_key))?;
        if gap_entry.as_gap() != Some(expected) {
            return Err(TimelineError::StaleGap(gap_key).into());
        }

        let far_side = self.far_side(txn, gap_key, expected.is_backward()).await?;
        let plan = plan_gap_fill(&gap_entry, &far_side, response)?;

        let mut entries = txn.timeline_entries();
        for key in &plan.removed {
            entries.remove(&(self.room_id.clone(), *key)).await?;
        }
        for entry in &plan.added {
            entries.add(&(self.room_id.clone(), entry.sort_key), entry).await?;
        }
        if let Some(relocation) = &plan.relocated {
            let entry = &relocation.entry;
            entries.add(&(self.room_id.clone(), entry.sort_key), entry).await?;
        }

        debug!(
            room_id = %self.room_id,
            gap = %gap_key,
            added = plan.added_events(),
            removed = plan.removed.len(),
            closed = plan.relocated.is_some(),
            "filled timeline gap"
        );

        Ok(TimelineChanges {
            fragments: Vec::new(),
            added: plan.added,
            removed: plan.removed,
            relocated: plan.relocated,
            live: None,
        })
    }
}
