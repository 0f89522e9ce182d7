//! Session state: sync token, filter id and the known rooms.

use crate::error::ClientError;
use crate::room::{Room, RoomLimits, RoomSyncChanges, RoomUpdate, StoredRoom};
use crate::scheduler::RequestScheduler;
use crate::storage::{Storage, Transaction};
use crate::transport::HomeServerApi;
use crate::util::lock;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use sync_core::{Membership, RoomSummary};
use sync_types::{RoomId, SyncResponse, UserId};
use tracing::{debug, info};

/// Session store key of the sync token.
pub const SYNC_TOKEN_KEY: &str = "sync_token";
/// Session store key of the filter id.
pub const FILTER_ID_KEY: &str = "filter_id";

#[derive(Debug, Clone, Default)]
struct SessionData {
    sync_token: Option<String>,
    filter_id: Option<String>,
}

/// Writes of one sync response, to apply after commit.
pub struct SessionChanges<A: HomeServerApi> {
    sync_token: String,
    rooms: Vec<(Arc<Room<A>>, bool, RoomSyncChanges)>,
}

impl<A: HomeServerApi> SessionChanges<A> {
    /// The token the response carried.
    pub fn sync_token(&self) -> &str {
        &self.sync_token
    }

    /// Number of rooms touched.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

/// In-memory session, loaded from storage at startup.
pub struct Session<A: HomeServerApi> {
    user_id: UserId,
    storage: Storage,
    scheduler: RequestScheduler<A>,
    limits: RoomLimits,
    data: Mutex<SessionData>,
    rooms: RwLock<BTreeMap<RoomId, Arc<Room<A>>>>,
}

impl<A: HomeServerApi> Session<A> {
    /// Load the session and every stored room.
    pub async fn load(
        user_id: UserId,
        storage: Storage,
        scheduler: RequestScheduler<A>,
        limits: RoomLimits,
    ) -> Result<Self, ClientError> {
        let mut txn = storage.read_write_txn().await?;
        let data = SessionData {
            sync_token: txn.session().get(&SYNC_TOKEN_KEY.to_string()).await?,
            filter_id: txn.session().get(&FILTER_ID_KEY.to_string()).await?,
        };

        let summaries: Vec<RoomSummary> = txn.room_summaries().all().await?;
        let mut stored: BTreeMap<RoomId, StoredRoom> = BTreeMap::new();
        for fragment in txn.timeline_fragments().all().await? {
            stored
                .entry(fragment.room_id.clone())
                .or_default()
                .fragments
                .push(fragment);
        }
        for entry in txn.timeline_entries().all().await? {
            stored
                .entry(entry.room_id.clone())
                .or_default()
                .entries
                .push(entry);
        }
        for pending in txn.pending_events().all().await? {
            stored
                .entry(pending.room_id.clone())
                .or_default()
                .pending
                .push(pending);
        }
        txn.abort().await;

        let mut rooms = BTreeMap::new();
        for summary in summaries {
            let room_id = summary.room_id.clone();
            let room = Room::restore(
                summary,
                stored.remove(&room_id).unwrap_or_default(),
                storage.clone(),
                scheduler.clone(),
                limits,
            );
            rooms.insert(room_id, Arc::new(room));
        }
        info!(
            rooms = rooms.len(),
            has_token = data.sync_token.is_some(),
            "session loaded"
        );

        Ok(Self {
            user_id,
            storage,
            scheduler,
            limits,
            data: Mutex::new(data),
            rooms: RwLock::new(rooms),
        })
    }

    /// Our user id.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Token of the last committed sync.
    pub fn sync_token(&self) -> Option<String> {
        lock(&self.data).sync_token.clone()
    }

    /// Cached filter id.
    pub fn filter_id(&self) -> Option<String> {
        lock(&self.data).filter_id.clone()
    }

    /// Cache a new filter id. It is persisted with the next sync.
    pub fn set_filter_id(&self, filter_id: String) {
        lock(&self.data).filter_id = Some(filter_id);
    }

    /// All rooms, by id.
    pub fn rooms(&self) -> Vec<Arc<Room<A>>> {
        self.read_rooms().values().cloned().collect()
    }

    /// One room.
    pub fn room(&self, room_id: &RoomId) -> Option<Arc<Room<A>>> {
        self.read_rooms().get(room_id).cloned()
    }

    /// Restart every paused send queue.
    pub fn resume_sending(&self) {
        for room in self.rooms() {
            room.send_queue().resume_sending();
        }
    }

    /// Write a sync response.
    ///
    /// Session values are written first, then rooms in join, invite, leave
    /// order. Rooms seen for the first time are created here but only become
    /// visible in [`after_sync`](Self::after_sync).
    pub async fn write_sync(
        &self,
        txn: &mut Transaction,
        response: &SyncResponse,
        since: Option<&str>,
    ) -> Result<SessionChanges<A>, ClientError> {
        txn.session()
            .set(&SYNC_TOKEN_KEY.to_string(), &response.next_batch)
            .await?;
        if let Some(filter_id) = self.filter_id() {
            txn.session()
                .set(&FILTER_ID_KEY.to_string(), &filter_id)
                .await?;
        }

        let updates = response
            .rooms
            .join
            .iter()
            .map(|(id, room)| (id, RoomUpdate::Joined(room)))
            .chain(
                response
                    .rooms
                    .invite
                    .iter()
                    .map(|(id, room)| (id, RoomUpdate::Invited(room))),
            )
            .chain(
                response
                    .rooms
                    .leave
                    .iter()
                    .map(|(id, room)| (id, RoomUpdate::Left(room))),
            );

        let mut rooms = Vec::new();
        let mut created: BTreeMap<RoomId, Arc<Room<A>>> = BTreeMap::new();
        for (room_id, update) in updates {
            let (room, is_new) = match self.room(room_id).or_else(|| created.get(room_id).cloned()) {
                Some(room) => (room, false),
                None => {
                    let room = Arc::new(Room::new(
                        room_id.clone(),
                        update.membership(),
                        self.storage.clone(),
                        self.scheduler.clone(),
                        self.limits,
                    ));
                    created.insert(room_id.clone(), Arc::clone(&room));
                    (room, true)
                }
            };
            let changes = room.write_sync(txn, update, since, &self.user_id).await?;
            rooms.push((room, is_new, changes));
        }

        Ok(SessionChanges {
            sync_token: response.next_batch.clone(),
            rooms,
        })
    }

    /// Take over a committed sync.
    pub fn after_sync(&self, changes: SessionChanges<A>) {
        lock(&self.data).sync_token = Some(changes.sync_token);
        for (room, is_new, room_changes) in changes.rooms {
            if is_new {
                debug!(room_id = %room.room_id(), "new room");
                self.write_rooms()
                    .entry(room.room_id().clone())
                    .or_insert_with(|| Arc::clone(&room));
            }
            room.after_sync(room_changes);
        }
    }

    /// Rooms with a given membership.
    pub fn rooms_with(&self, membership: Membership) -> Vec<Arc<Room<A>>> {
        self.rooms()
            .into_iter()
            .filter(|r| r.summary().membership == membership)
            .collect()
    }

    fn read_rooms(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<RoomId, Arc<Room<A>>>> {
        self.rooms.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_rooms(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<RoomId, Arc<Room<A>>>> {
        self.rooms.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
