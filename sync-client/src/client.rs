//! The sync client: wires storage, transport, reconnection, the sync loop and
//! the send queues together.

use crate::config::SyncConfig;
use crate::error::ClientError;
use crate::reconnector::Reconnector;
use crate::room::{Room, RoomLimits};
use crate::scheduler::RequestScheduler;
use crate::session::Session;
use crate::storage::Storage;
use crate::sync_loop::{SyncLoop, SyncSettings};
use crate::transport::{HomeServerApi, HttpTransport};
use crate::util::lock;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_core::{ConnectionStatus, PendingEvent, SyncStatus};
use sync_types::{RoomId, UserId};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The main sync client.
///
/// Keeps the sync loop running across connection losses: when the
/// reconnector reports the homeserver reachable again, paused send queues
/// resume and a sync stopped by a connection error restarts.
pub struct SyncClient<A: HomeServerApi> {
    config: SyncConfig,
    storage: Storage,
    reconnector: Arc<Reconnector<A>>,
    scheduler: RequestScheduler<A>,
    session: Arc<Session<A>>,
    sync: Arc<SyncLoop<A>>,
    watcher: Mutex<Option<CancellationToken>>,
}

impl<A: HomeServerApi> fmt::Debug for SyncClient<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClient")
            .field("config", &self.config)
            .field("sync_status", &self.sync.status())
            .field("connection_status", &self.reconnector.status())
            .finish()
    }
}

impl SyncClient<HttpTransport> {
    /// Create a client talking to the configured homeserver over HTTP.
    pub async fn connect(config: SyncConfig) -> Result<Self, ClientError> {
        let api = HttpTransport::new(&config.homeserver_url, &config.access_token)?;
        Self::new(config, api).await
    }
}

impl<A: HomeServerApi> SyncClient<A> {
    /// Create a client over `api`, loading the stored session.
    pub async fn new(config: SyncConfig, api: A) -> Result<Self, ClientError> {
        let storage = match &config.store_path {
            Some(path) => Storage::open(path).await?,
            None => Storage::in_memory().await?,
        };
        let api = Arc::new(api);
        let reconnector = Reconnector::new(
            Arc::clone(&api),
            config.probe_timeout(),
            config.retry_start(),
            config.retry_max(),
        );
        let scheduler = RequestScheduler::new(
            api,
            Some(Arc::clone(&reconnector)),
            config.retry_start(),
            config.retry_max(),
        );
        let limits = RoomLimits {
            pending_capacity: config.pending_capacity,
            pagination_limit: config.pagination_limit,
        };
        let session = Arc::new(
            Session::load(
                config.user_id.clone(),
                storage.clone(),
                scheduler.clone(),
                limits,
            )
            .await?,
        );
        let sync = SyncLoop::new(
            Arc::clone(&session),
            storage.clone(),
            scheduler.clone(),
            SyncSettings::from_config(&config),
        );

        Ok(Self {
            config,
            storage,
            reconnector,
            scheduler,
            session,
            sync,
            watcher: Mutex::new(None),
        })
    }

    /// Start syncing and sending.
    pub fn start(&self) {
        self.scheduler.start();
        self.sync.start();
        self.session.resume_sending();

        let mut watcher = lock(&self.watcher);
        if watcher.is_none() {
            let token = CancellationToken::new();
            tokio::spawn(watch_connection(
                Arc::clone(&self.reconnector),
                Arc::clone(&self.session),
                Arc::clone(&self.sync),
                token.clone(),
            ));
            *watcher = Some(token);
        }
        info!(user_id = %self.config.user_id, "sync client started");
    }

    /// Stop syncing and abort every request in flight.
    pub fn stop(&self) {
        if let Some(token) = lock(&self.watcher).take() {
            token.cancel();
        }
        self.sync.stop();
        self.scheduler.stop();
        info!("sync client stopped");
    }

    /// The logged-in user.
    pub fn user_id(&self) -> &UserId {
        &self.config.user_id
    }

    /// Current sync status.
    pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.sync.subscribe()
    }

    /// Current connection status.
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.reconnector.subscribe()
    }

    /// Time left until the next reachability probe.
    pub fn retry_in(&self) -> Duration {
        self.reconnector.retry_in()
    }

    /// The error that stopped the sync loop, if any.
    pub fn last_sync_error(&self) -> Option<Arc<ClientError>> {
        self.sync.last_error()
    }

    /// The platform reports network connectivity: probe right away.
    pub fn network_available(&self) {
        self.reconnector.try_now();
    }

    /// Token of the last committed sync.
    pub fn sync_token(&self) -> Option<String> {
        self.session.sync_token()
    }

    /// All known rooms.
    pub fn rooms(&self) -> Vec<Arc<Room<A>>> {
        self.session.rooms()
    }

    /// One room.
    pub fn room(&self, room_id: &RoomId) -> Option<Arc<Room<A>>> {
        self.session.room(room_id)
    }

    /// Queue a text message for a room.
    pub async fn send_message(&self, room_id: &RoomId, body: &str) -> Result<PendingEvent, ClientError> {
        let room = self
            .room(room_id)
            .ok_or_else(|| ClientError::UnknownRoom(room_id.clone()))?;
        room.send_text(body).await
    }

    /// The underlying store.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl<A: HomeServerApi> Drop for SyncClient<A> {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.watcher).take() {
            token.cancel();
        }
        self.sync.stop();
    }
}

/// Resume work once the homeserver is reachable again.
async fn watch_connection<A: HomeServerApi>(
    reconnector: Arc<Reconnector<A>>,
    session: Arc<Session<A>>,
    sync: Arc<SyncLoop<A>>,
    token: CancellationToken,
) {
    let mut connection = reconnector.subscribe();
    let mut sync_status = sync.subscribe();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *connection.borrow_and_update();
                debug!(%status, "connection status changed");
                if status == ConnectionStatus::Online {
                    session.resume_sending();
                    sync.start();
                }
            }
            changed = sync_status.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *sync_status.borrow_and_update();
                // The probe may have succeeded before the loop noticed the loss.
                let lost = sync.last_error().is_some_and(|e| e.is_connection());
                if status == SyncStatus::Stopped
                    && lost
                    && reconnector.status() == ConnectionStatus::Online
                {
                    sync.start();
                }
            }
        }
    }
}
