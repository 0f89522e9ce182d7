//! Pending event queue for roomsync.
//!
//! This module provides the per-room queue of locally authored events with:
//! - FIFO ordering by `queue_index`
//! - Sent tracking (the server assigned an event id, echo not yet seen)
//! - Failure tracking (the server rejected the event permanently)
//! - Max size limits on events that still await their echo; rejected events
//!   do not count
//!
//! Events are allocated, persisted by the caller, pushed, and stay in the
//! queue until their remote echo arrives through sync.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use sync_types::{EventId, RoomId, TxnId};
use thiserror::Error;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity.
    #[error("pending queue full (capacity: {capacity})")]
    Full {
        /// Current queue capacity.
        capacity: usize,
    },
    /// No pending event has this transaction id.
    #[error("no pending event with transaction id {0}")]
    UnknownTxnId(TxnId),
}

/// A locally authored event waiting for its remote echo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Room the event is sent to.
    pub room_id: RoomId,
    /// Position in the room's queue.
    pub queue_index: u64,
    /// Event type.
    pub event_type: String,
    /// Event content.
    pub content: Value,
    /// Idempotency token of the send.
    pub txn_id: TxnId,
    /// Server-assigned id once the send succeeded.
    #[serde(default)]
    pub remote_id: Option<EventId>,
    /// Permanent send failure, if any.
    #[serde(default)]
    pub error: Option<String>,
}

impl PendingEvent {
    /// Check if the server accepted the event.
    pub fn is_sent(&self) -> bool {
        self.remote_id.is_some()
    }

    /// Check if the event still needs sending.
    pub fn is_unsent(&self) -> bool {
        self.remote_id.is_none() && self.error.is_none()
    }
}

/// Ordered pending events of one room.
#[derive(Debug)]
pub struct PendingQueue {
    room_id: RoomId,
    /// Maximum number of events.
    max_size: usize,
    /// Events by ascending `queue_index`.
    events: VecDeque<PendingEvent>,
    next_index: u64,
}

impl PendingQueue {
    /// Create an empty queue with the given maximum size.
    pub fn new(room_id: RoomId, max_size: usize) -> Self {
        Self {
            room_id,
            max_size,
            events: VecDeque::new(),
            next_index: 0,
        }
    }

    /// Rebuild a queue from stored events.
    pub fn from_persisted(
        room_id: RoomId,
        max_size: usize,
        events: impl IntoIterator<Item = PendingEvent>,
    ) -> Self {
        let mut events: Vec<PendingEvent> = events.into_iter().collect();
        events.sort_by_key(|e| e.queue_index);
        let next_index = events.last().map_or(0, |e| e.queue_index + 1);
        Self {
            room_id,
            max_size,
            events: events.into(),
            next_index,
        }
    }

    /// Create the next pending event without adding it.
    ///
    /// The caller persists the event, then calls [`push`](Self::push).
    /// Returns an error if the queue is full. Events with a recorded failure
    /// are not counted.
    pub fn allocate(&mut self, event_type: &str, content: Value) -> Result<PendingEvent, QueueError> {
        let active = self.events.iter().filter(|e| e.error.is_none()).count();
        if active >= self.max_size {
            return Err(QueueError::Full {
                capacity: self.max_size,
            });
        }
        let event = PendingEvent {
            room_id: self.room_id.clone(),
            queue_index: self.next_index,
            event_type: event_type.to_string(),
            content,
            txn_id: TxnId::generate(),
            remote_id: None,
            error: None,
        };
        self.next_index += 1;
        Ok(event)
    }

    /// Append an allocated event. Returns its position.
    pub fn push(&mut self, event: PendingEvent) -> usize {
        self.next_index = self.next_index.max(event.queue_index + 1);
        let position = self
            .events
            .iter()
            .position(|e| e.queue_index > event.queue_index)
            .unwrap_or(self.events.len());
        self.events.insert(position, event);
        position
    }

    /// The oldest event that still needs sending.
    pub fn next_unsent(&self) -> Option<&PendingEvent> {
        self.events.iter().find(|e| e.is_unsent())
    }

    /// Record the server-assigned id. Returns the updated event and its position.
    pub fn mark_sent(&mut self, txn_id: &TxnId, remote_id: EventId) -> Option<(usize, &PendingEvent)> {
        let position = self.position(txn_id)?;
        let event = &mut self.events[position];
        event.remote_id = Some(remote_id);
        Some((position, &self.events[position]))
    }

    /// Record a permanent failure. Returns the updated event and its position.
    pub fn mark_failed(&mut self, txn_id: &TxnId, error: String) -> Option<(usize, &PendingEvent)> {
        let position = self.position(txn_id)?;
        self.events[position].error = Some(error);
        Some((position, &self.events[position]))
    }

    /// Clear a recorded failure so the event is sent again.
    pub fn clear_error(&mut self, txn_id: &TxnId) -> Result<(usize, &PendingEvent), QueueError> {
        let position = self
            .position(txn_id)
            .ok_or_else(|| QueueError::UnknownTxnId(txn_id.clone()))?;
        self.events[position].error = None;
        Ok((position, &self.events[position]))
    }

    /// Remove an event. Returns its former position and the event.
    pub fn remove(&mut self, txn_id: &TxnId) -> Option<(usize, PendingEvent)> {
        let position = self.position(txn_id)?;
        self.events.remove(position).map(|e| (position, e))
    }

    /// Position of an event in the queue.
    pub fn position(&self, txn_id: &TxnId) -> Option<usize> {
        self.events.iter().position(|e| &e.txn_id == txn_id)
    }

    /// Look up an event.
    pub fn get(&self, txn_id: &TxnId) -> Option<&PendingEvent> {
        self.events.iter().find(|e| &e.txn_id == txn_id)
    }

    /// Check if an event with this transaction id is queued.
    pub fn contains(&self, txn_id: &TxnId) -> bool {
        self.position(txn_id).is_some()
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingEvent> {
        self.events.iter()
    }
}
