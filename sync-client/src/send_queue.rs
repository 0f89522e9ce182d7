//! Per-room outbound event queue.
//!
//! Events are persisted before they are queued, sent one at a time in
//! `queue_index` order, and dropped only when their remote echo arrives
//! through sync. A connection failure pauses the queue until
//! [`SendQueue::resume_sending`]; any other failure is recorded on the event
//! and the queue moves on. In-memory state changes only after the storage
//! write committed.

use crate::error::ClientError;
use crate::observable::ObservableList;
use crate::scheduler::{AbortHandle, RequestScheduler};
use crate::storage::Storage;
use crate::transport::HomeServerApi;
use crate::util::lock;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use sync_core::{PendingEvent, PendingQueue, QueueError};
use sync_types::{ApiError, EventId, RoomId, TxnId};
use tracing::{debug, info, warn};

struct QueueState {
    queue: PendingQueue,
    sending: bool,
    offline: bool,
    in_flight: Option<(TxnId, AbortHandle)>,
}

/// Outbound queue of one room.
pub struct SendQueue<A: HomeServerApi> {
    room_id: RoomId,
    storage: Storage,
    scheduler: RequestScheduler<A>,
    state: Mutex<QueueState>,
    // Held from index allocation until the event is in the queue.
    enqueue_lock: tokio::sync::Mutex<()>,
    pending: ObservableList<PendingEvent>,
}

impl<A: HomeServerApi> SendQueue<A> {
    /// Create a queue, resuming events loaded from storage.
    ///
    /// Loaded events are not sent until [`resume_sending`](Self::resume_sending).
    pub fn new(
        room_id: RoomId,
        storage: Storage,
        scheduler: RequestScheduler<A>,
        capacity: usize,
        persisted: Vec<PendingEvent>,
    ) -> Arc<Self> {
        let queue = PendingQueue::from_persisted(room_id.clone(), capacity, persisted);
        let pending = ObservableList::new(queue.iter().cloned().collect());
        Arc::new(Self {
            room_id,
            storage,
            scheduler,
            state: Mutex::new(QueueState {
                queue,
                sending: false,
                offline: false,
                in_flight: None,
            }),
            enqueue_lock: tokio::sync::Mutex::new(()),
            pending,
        })
    }

    /// Room this queue sends to.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Pending events, in queue order.
    pub fn pending(&self) -> &ObservableList<PendingEvent> {
        &self.pending
    }

    /// Check if sending is paused after a connection failure.
    pub fn is_offline(&self) -> bool {
        lock(&self.state).offline
    }

    /// Check if the send loop is running.
    pub fn is_sending(&self) -> bool {
        lock(&self.state).sending
    }

    /// Queue an event for sending.
    pub async fn enqueue_event(
        self: &Arc<Self>,
        event_type: &str,
        content: Value,
    ) -> Result<PendingEvent, ClientError> {
        let _order = self.enqueue_lock.lock().await;
        let event = lock(&self.state).queue.allocate(event_type, content)?;

        let mut txn = self.storage.read_write_txn().await?;
        txn.pending_events()
            .add(&(self.room_id.clone(), event.queue_index), &event)
            .await?;
        txn.complete().await?;

        {
            let mut state = lock(&self.state);
            let position = state.queue.push(event.clone());
            self.pending.insert(position, event.clone());
        }
        debug!(room_id = %self.room_id, txn_id = %event.txn_id, "queued event");
        self.kick();
        Ok(event)
    }

    /// The remote echo of `txn_id` arrived: drop the event.
    ///
    /// Aborts the send if it is in flight. Returns `false` when the event was
    /// not queued.
    pub async fn receive_remote_echo(self: &Arc<Self>, txn_id: &TxnId) -> Result<bool, ClientError> {
        let Some(queue_index) = self.stop_sending(txn_id) else {
            return Ok(false);
        };
        self.remove_stored(txn_id, queue_index).await?;
        Ok(true)
    }

    /// Drop a queued event without waiting for its echo, typically one the
    /// server rejected.
    pub async fn discard_event(self: &Arc<Self>, txn_id: &TxnId) -> Result<(), ClientError> {
        let queue_index = self
            .stop_sending(txn_id)
            .ok_or_else(|| QueueError::UnknownTxnId(txn_id.clone()))?;
        self.remove_stored(txn_id, queue_index).await?;
        info!(room_id = %self.room_id, %txn_id, "discarded pending event");
        Ok(())
    }

    /// Drop events whose echoes were already removed from storage.
    pub fn apply_remote_echoes(&self, txn_ids: &[TxnId]) {
        for txn_id in txn_ids {
            self.remove_local(txn_id);
        }
    }

    /// Leave offline mode and send whatever is waiting.
    pub fn resume_sending(self: &Arc<Self>) {
        lock(&self.state).offline = false;
        self.kick();
    }

    /// Clear the recorded failure of an event and send it again.
    pub async fn retry_event(self: &Arc<Self>, txn_id: &TxnId) -> Result<(), ClientError> {
        let queue_index = lock(&self.state)
            .queue
            .get(txn_id)
            .map(|e| e.queue_index)
            .ok_or_else(|| QueueError::UnknownTxnId(txn_id.clone()))?;

        let mut txn = self.storage.read_write_txn().await?;
        {
            let mut store = txn.pending_events();
            let key = (self.room_id.clone(), queue_index);
            if let Some(mut stored) = store.get(&key).await? {
                stored.error = None;
                store.set(&key, &stored).await?;
            }
        }
        txn.complete().await?;

        {
            let mut state = lock(&self.state);
            let (position, event) = state.queue.clear_error(txn_id)?;
            self.pending.update(position, event.clone());
        }
        self.kick();
        Ok(())
    }

    /// Abort the send of `txn_id` if it is in flight. Returns the event's
    /// queue index, or `None` when it is not queued.
    fn stop_sending(&self, txn_id: &TxnId) -> Option<u64> {
        let state = lock(&self.state);
        let queue_index = state.queue.get(txn_id)?.queue_index;
        if let Some((in_flight, handle)) = &state.in_flight {
            if in_flight == txn_id {
                debug!(room_id = %self.room_id, %txn_id, "aborting send");
                handle.abort();
            }
        }
        Some(queue_index)
    }

    /// Delete a stored event, then drop it from the queue.
    ///
    /// On a failed commit the event stays queued. Either way the send loop is
    /// restarted, since [`stop_sending`](Self::stop_sending) may have ended it.
    async fn remove_stored(self: &Arc<Self>, txn_id: &TxnId, queue_index: u64) -> Result<(), ClientError> {
        let removed = async {
            let mut txn = self.storage.read_write_txn().await?;
            txn.pending_events()
                .remove(&(self.room_id.clone(), queue_index))
                .await?;
            txn.complete().await?;
            Ok::<_, ClientError>(())
        }
        .await;
        if removed.is_ok() {
            self.remove_local(txn_id);
        }
        self.kick();
        removed
    }

    fn remove_local(&self, txn_id: &TxnId) -> Option<PendingEvent> {
        let mut state = lock(&self.state);
        if let Some((in_flight, handle)) = &state.in_flight {
            if in_flight == txn_id {
                debug!(room_id = %self.room_id, %txn_id, "echo arrived, aborting send");
                handle.abort();
            }
        }
        let (position, event) = state.queue.remove(txn_id)?;
        self.pending.remove(position);
        Some(event)
    }

    /// Start the send loop unless it runs, the queue is offline or there is
    /// nothing to send.
    fn kick(self: &Arc<Self>) {
        {
            let mut state = lock(&self.state);
            if state.sending || state.offline || state.queue.next_unsent().is_none() {
                return;
            }
            state.sending = true;
        }
        tokio::spawn(Arc::clone(self).send_loop());
    }

    fn pause(&self) {
        let mut state = lock(&self.state);
        state.offline = true;
        state.sending = false;
    }

    async fn send_loop(self: Arc<Self>) {
        loop {
            let (event, request) = {
                let mut state = lock(&self.state);
                let next = if state.offline {
                    None
                } else {
                    state.queue.next_unsent().cloned()
                };
                let Some(event) = next else {
                    state.sending = false;
                    return;
                };
                let request = self.scheduler.send(
                    self.room_id.clone(),
                    event.event_type.clone(),
                    event.txn_id.clone(),
                    event.content.clone(),
                );
                state.in_flight = Some((event.txn_id.clone(), request.abort_handle()));
                (event, request)
            };

            let result = request.response().await;
            lock(&self.state).in_flight = None;

            let recorded = match result {
                Ok(response) => self.record_sent(&event, response.event_id).await,
                Err(ApiError::Aborted) => {
                    let mut state = lock(&self.state);
                    if state.queue.contains(&event.txn_id) {
                        // Stopped from outside; whoever stopped it kicks again.
                        state.sending = false;
                        return;
                    }
                    Ok(())
                }
                Err(error) if error.is_connection() => {
                    info!(room_id = %self.room_id, txn_id = %event.txn_id, "send queue offline");
                    self.pause();
                    return;
                }
                Err(error) => self.record_failure(&event, error.to_string()).await,
            };
            if let Err(error) = recorded {
                // The event stays unsent; resending reuses its transaction id.
                warn!(room_id = %self.room_id, txn_id = %event.txn_id, %error, "failed to persist send result, pausing queue");
                self.pause();
                return;
            }
        }
    }

    async fn record_sent(&self, event: &PendingEvent, remote_id: EventId) -> Result<(), ClientError> {
        debug!(room_id = %self.room_id, txn_id = %event.txn_id, event_id = %remote_id, "event sent");
        let key = (self.room_id.clone(), event.queue_index);
        let mut txn = self.storage.read_write_txn().await?;
        {
            let mut store = txn.pending_events();
            if let Some(mut stored) = store.get(&key).await? {
                stored.remote_id = Some(remote_id.clone());
                store.set(&key, &stored).await?;
            }
        }
        txn.complete().await?;

        let mut state = lock(&self.state);
        if let Some((position, updated)) = state.queue.mark_sent(&event.txn_id, remote_id) {
            self.pending.update(position, updated.clone());
        }
        Ok(())
    }

    async fn record_failure(&self, event: &PendingEvent, error: String) -> Result<(), ClientError> {
        warn!(room_id = %self.room_id, txn_id = %event.txn_id, %error, "send rejected");
        let key = (self.room_id.clone(), event.queue_index);
        let mut txn = self.storage.read_write_txn().await?;
        {
            let mut store = txn.pending_events();
            if let Some(mut stored) = store.get(&key).await? {
                stored.error = Some(error.clone());
                store.set(&key, &stored).await?;
            }
        }
        txn.complete().await?;

        let mut state = lock(&self.state);
        if let Some((position, updated)) = state.queue.mark_failed(&event.txn_id, error) {
            self.pending.update(position, updated.clone());
        }
        Ok(())
    }
}
