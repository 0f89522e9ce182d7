//! The sync loop.
//!
//! ```text
//! Stopped ─start()─► InitialSync | CatchupSync ─first response─► Syncing
//!    ▲                                                              │
//!    └──────────────── error (recorded) or stop() ◄─────────────────┘
//! ```
//!
//! Each response is written in one transaction. The session and rooms take
//! over the result only after that transaction committed, so the stored sync
//! token never runs ahead of the data derived from it. A restarted loop waits
//! for the previous run to finish, and a stopped run writes nothing.

use crate::config::SyncConfig;
use crate::error::ClientError;
use crate::scheduler::{AbortHandle, RequestScheduler};
use crate::session::Session;
use crate::storage::Storage;
use crate::transport::{HomeServerApi, SyncRequest};
use crate::util::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_core::SyncStatus;
use sync_types::{ApiError, FilterDefinition};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing and filter settings of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Long-poll timeout sent to the server.
    pub poll_timeout: Duration,
    /// Client-side deadline of one long-poll request.
    pub request_timeout: Duration,
    /// Request lazy loading of members in the filter.
    pub lazy_load_members: bool,
}

impl SyncSettings {
    /// Settings from a configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        let poll_timeout = config.sync_timeout();
        Self {
            poll_timeout,
            request_timeout: config.request_timeout(poll_timeout),
            lazy_load_members: config.lazy_load_members,
        }
    }
}

struct Run {
    generation: u64,
    token: CancellationToken,
}

/// Drives `/sync` requests and persists their results.
pub struct SyncLoop<A: HomeServerApi> {
    session: Arc<Session<A>>,
    storage: Storage,
    scheduler: RequestScheduler<A>,
    settings: SyncSettings,
    status: watch::Sender<SyncStatus>,
    last_error: Mutex<Option<Arc<ClientError>>>,
    run: Mutex<Option<Run>>,
    next_generation: Mutex<u64>,
    in_flight: Mutex<Option<AbortHandle>>,
    last_run: Mutex<Option<JoinHandle<()>>>,
}

impl<A: HomeServerApi> SyncLoop<A> {
    /// Create a stopped loop.
    pub fn new(
        session: Arc<Session<A>>,
        storage: Storage,
        scheduler: RequestScheduler<A>,
        settings: SyncSettings,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(SyncStatus::Stopped);
        Arc::new(Self {
            session,
            storage,
            scheduler,
            settings,
            status,
            last_error: Mutex::new(None),
            run: Mutex::new(None),
            next_generation: Mutex::new(0),
            in_flight: Mutex::new(None),
            last_run: Mutex::new(None),
        })
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Receiver of status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// The error that stopped the last run, if any.
    pub fn last_error(&self) -> Option<Arc<ClientError>> {
        lock(&self.last_error).clone()
    }

    /// Start syncing. Does nothing unless stopped.
    pub fn start(self: &Arc<Self>) {
        let token = CancellationToken::new();
        let mut run = lock(&self.run);
        if run.is_some() || self.status().is_running() {
            return;
        }
        let generation = {
            let mut next = lock(&self.next_generation);
            *next += 1;
            *next
        };
        *run = Some(Run {
            generation,
            token: token.clone(),
        });
        let status = SyncStatus::starting(self.session.sync_token().is_some());
        info!(%status, "sync starting");
        self.status.send_replace(status);
        *lock(&self.last_error) = None;

        let mut last_run = lock(&self.last_run);
        let previous = last_run.take();
        *last_run = Some(tokio::spawn(Arc::clone(self).run(generation, token, previous)));
    }

    /// Stop syncing and abort the request in flight.
    pub fn stop(&self) {
        let run = lock(&self.run).take();
        if let Some(run) = run {
            run.token.cancel();
            if let Some(request) = lock(&self.in_flight).take() {
                request.abort();
            }
            info!("sync stopped");
            self.status.send_replace(SyncStatus::Stopped);
        }
    }

    async fn run(
        self: Arc<Self>,
        generation: u64,
        token: CancellationToken,
        previous: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = previous {
            if let Err(error) = previous.await {
                warn!(%error, "previous sync run panicked");
            }
        }
        let result = self.run_loop(&token).await;

        let mut run = lock(&self.run);
        if run.as_ref().map(|r| r.generation) != Some(generation) {
            // Stopped or restarted meanwhile.
            return;
        }
        *run = None;
        match result {
            Err(error) if !error.is_aborted() => {
                warn!(%error, "sync halted");
                *lock(&self.last_error) = Some(Arc::new(error));
            }
            _ => debug!("sync loop ended"),
        }
        self.status.send_replace(SyncStatus::Stopped);
    }

    async fn run_loop(&self, token: &CancellationToken) -> Result<(), ClientError> {
        let mut first = true;
        while !token.is_cancelled() {
            let filter_id = self.ensure_filter().await?;
            let since = self.session.sync_token();
            let request = SyncRequest {
                since: since.clone(),
                filter_id: Some(filter_id),
                timeout: if first {
                    Duration::ZERO
                } else {
                    self.settings.poll_timeout
                },
                request_timeout: Some(self.settings.request_timeout),
            };

            let pending = self.scheduler.sync(request);
            *lock(&self.in_flight) = Some(pending.abort_handle());
            if token.is_cancelled() {
                pending.abort();
            }
            let response = pending.response().await;
            *lock(&self.in_flight) = None;
            let response = response?;

            let mut txn = self.storage.read_write_txn().await?;
            if token.is_cancelled() {
                txn.abort().await;
                return Err(ApiError::Aborted.into());
            }
            let changes = match self
                .session
                .write_sync(&mut txn, &response, since.as_deref())
                .await
            {
                Ok(changes) => changes,
                Err(error) => {
                    txn.abort().await;
                    return Err(error);
                }
            };
            txn.complete().await?;
            debug!(
                next_batch = %changes.sync_token(),
                rooms = changes.room_count(),
                "sync response committed"
            );
            self.session.after_sync(changes);

            if first && !token.is_cancelled() {
                self.status.send_replace(SyncStatus::Syncing);
                first = false;
            }
        }
        Ok(())
    }

    async fn ensure_filter(&self) -> Result<String, ClientError> {
        if let Some(filter_id) = self.session.filter_id() {
            return Ok(filter_id);
        }
        let filter = if self.settings.lazy_load_members {
            FilterDefinition::lazy_load_members()
        } else {
            FilterDefinition::default()
        };
        let response = self
            .scheduler
            .create_filter(self.session.user_id().clone(), filter)
            .response()
            .await?;
        debug!(filter_id = %response.filter_id, "created sync filter");
        self.session.set_filter_id(response.filter_id.clone());
        Ok(response.filter_id)
    }
}
