//! Reconnector - detects lost connectivity and probes until it is back.
//!
//! The transitions come from the pure [`ReconnectState`] machine in
//! sync-core; this module interprets its actions:
//!
//! ```text
//! request fails ─► Reconnecting ─probe ok─► Online
//!                      │   ▲
//!          connection  ▼   │ backoff elapsed
//!            error  Waiting
//! ```
//!
//! Any probe error other than a connection failure stops the loop and is
//! kept as [`Reconnector::last_error`].

use crate::retry::ExponentialRetryDelay;
use crate::transport::HomeServerApi;
use crate::util::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_core::{Action, ConnectionStatus, Event, ReconnectState};
use sync_types::{ApiError, VersionsResponse};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection health monitor.
pub struct Reconnector<A: HomeServerApi> {
    api: Arc<A>,
    probe_timeout: Duration,
    retry: ExponentialRetryDelay,
    state: Mutex<ReconnectState>,
    status: watch::Sender<ConnectionStatus>,
    wait_deadline: Mutex<Option<Instant>>,
    last_versions: Mutex<Option<VersionsResponse>>,
    last_error: Mutex<Option<ApiError>>,
}

impl<A: HomeServerApi> Reconnector<A> {
    /// Create a reconnector that probes `api`.
    pub fn new(
        api: Arc<A>,
        probe_timeout: Duration,
        retry_start: Duration,
        retry_max: Duration,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(ConnectionStatus::Online);
        Arc::new(Self {
            api,
            probe_timeout,
            retry: ExponentialRetryDelay::new(retry_start, retry_max),
            state: Mutex::new(ReconnectState::new()),
            status,
            wait_deadline: Mutex::new(None),
            last_versions: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    /// Report a request that failed with a connection error.
    ///
    /// Starts the reconnect loop unless one is already running.
    pub fn on_request_failed(self: &Arc<Self>) {
        self.dispatch(Event::RequestFailed);
    }

    /// Retry right away, e.g. when the OS reports the network is back.
    ///
    /// Cuts a backoff wait short, or starts a fresh loop after a fatal error.
    pub fn try_now(self: &Arc<Self>) {
        self.dispatch(Event::RetryRequested);
    }

    /// Subscribe to status changes. The receiver starts with the current status.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Time left before the next probe. Zero unless waiting.
    pub fn retry_in(&self) -> Duration {
        lock(&self.wait_deadline)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Response of the last successful probe.
    pub fn last_versions_response(&self) -> Option<VersionsResponse> {
        lock(&self.last_versions).clone()
    }

    /// The error that stopped the last loop, if it ended fatally.
    pub fn last_error(&self) -> Option<ApiError> {
        lock(&self.last_error).clone()
    }

    fn dispatch(self: &Arc<Self>, event: Event) {
        let actions = self.apply(event);
        if actions.contains(&Action::StartProbe) {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run().await });
        }
    }

    /// Feed an event to the state machine and execute the immediate actions.
    ///
    /// `StartProbe` and `StartWait` are left to the caller.
    fn apply(&self, event: Event) -> Vec<Action> {
        let actions = {
            let mut state = lock(&self.state);
            let (next, actions) = state.clone().on_event(event);
            *state = next;
            // A retry request that sees `Waiting` must find the wait armed.
            if actions.contains(&Action::StartWait) {
                self.retry.arm();
            }
            actions
        };

        for action in &actions {
            match action {
                Action::EmitStatus(status) => {
                    self.status.send_replace(*status);
                }
                Action::StartWait => {
                    let delay = self.retry.next_value();
                    *lock(&self.wait_deadline) = Some(Instant::now() + delay);
                    info!(delay_ms = delay.as_millis() as u64, "homeserver unreachable, waiting");
                }
                Action::StartProbe => {
                    *lock(&self.wait_deadline) = None;
                }
                Action::CancelWait => self.retry.abort(),
                Action::ResetBackoff => self.retry.reset(),
                Action::ReportFatal { error } => {
                    *lock(&self.wait_deadline) = None;
                    warn!(%error, "reconnect stopped");
                }
            }
        }
        actions
    }

    async fn run(self: Arc<Self>) {
        loop {
            let event = match tokio::time::timeout(self.probe_timeout, self.api.versions()).await {
                Ok(Ok(versions)) => {
                    *lock(&self.last_versions) = Some(versions);
                    *lock(&self.last_error) = None;
                    info!("homeserver reachable");
                    Event::ProbeSucceeded
                }
                Ok(Err(error)) if error.is_connection() => {
                    debug!(%error, "probe failed");
                    Event::ConnectionLost
                }
                Err(_) => {
                    debug!("probe timed out");
                    Event::ConnectionLost
                }
                Ok(Err(error)) => {
                    let message = error.to_string();
                    *lock(&self.last_error) = Some(error);
                    Event::ProbeRejected { error: message }
                }
            };

            let mut actions = self.apply(event);
            if actions.contains(&Action::StartWait) {
                // Aborted waits probe right away.
                let _ = self.retry.wait_for_retry().await;
                actions = self.apply(Event::WaitElapsed);
            }
            if !actions.contains(&Action::StartProbe) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn reconnector(mock: &MockTransport) -> Arc<Reconnector<MockTransport>> {
        Reconnector::new(
            Arc::new(mock.clone()),
            Duration::from_secs(10),
            Duration::from_secs(2),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn reports_status_sequence_until_online() {
        let mock = MockTransport::new();
        mock.set_latency(Duration::from_millis(100));
        mock.queue_versions(Err(ApiError::Connection("refused".into())));
        mock.queue_versions(Ok(VersionsResponse {
            versions: vec!["v1.9".into()],
        }));

        let reconnector = reconnector(&mock);
        let mut status = reconnector.subscribe();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Online);

        reconnector.on_request_failed();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Reconnecting);

        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Waiting);
        assert_eq!(reconnector.retry_in(), Duration::from_secs(2));

        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Reconnecting);

        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Online);

        assert_eq!(
            reconnector.last_versions_response(),
            Some(VersionsResponse {
                versions: vec!["v1.9".into()]
            })
        );
        assert_eq!(mock.versions_count(), 2);
        assert_eq!(reconnector.retry_in(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_run_one_loop() {
        let mock = MockTransport::new();
        mock.set_latency(Duration::from_millis(100));
        let reconnector = reconnector(&mock);

        reconnector.on_request_failed();
        reconnector.on_request_failed();
        reconnector.on_request_failed();

        let mut status = reconnector.subscribe();
        while *status.borrow_and_update() != ConnectionStatus::Online {
            status.changed().await.unwrap();
        }
        assert_eq!(mock.versions_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_probe_error_stops_loop() {
        let mock = MockTransport::new();
        mock.queue_versions(Err(ApiError::Server {
            status: 401,
            errcode: "M_UNKNOWN_TOKEN".into(),
            message: "invalid token".into(),
        }));

        let reconnector = reconnector(&mock);
        let mut status = reconnector.subscribe();
        reconnector.on_request_failed();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Reconnecting);

        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Waiting);
        assert_eq!(reconnector.retry_in(), Duration::ZERO);
        assert!(matches!(
            reconnector.last_error(),
            Some(ApiError::Server { status: 401, .. })
        ));

        // nothing else is probed
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(mock.versions_count(), 1);

        // an explicit retry starts a fresh loop
        reconnector.try_now();
        while *status.borrow_and_update() != ConnectionStatus::Online {
            status.changed().await.unwrap();
        }
        assert_eq!(mock.versions_count(), 2);
        assert!(reconnector.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn try_now_cuts_wait_short() {
        let mock = MockTransport::new();
        mock.queue_versions(Err(ApiError::Connection("refused".into())));

        let reconnector = Reconnector::new(
            Arc::new(mock.clone()),
            Duration::from_secs(10),
            Duration::from_secs(120),
            Duration::from_secs(600),
        );
        let mut status = reconnector.subscribe();
        reconnector.on_request_failed();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Reconnecting);

        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Waiting);

        let started = Instant::now();
        reconnector.try_now();
        while *status.borrow_and_update() != ConnectionStatus::Online {
            status.changed().await.unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn try_now_right_after_waiting_is_not_lost() {
        let mock = MockTransport::new();
        let reconnector = Reconnector::new(
            Arc::new(mock.clone()),
            Duration::from_secs(10),
            Duration::from_secs(300),
            Duration::from_secs(600),
        );

        reconnector.apply(Event::RequestFailed);
        reconnector.apply(Event::ConnectionLost);
        assert_eq!(reconnector.status(), ConnectionStatus::Waiting);
        // The retry lands before the loop starts waiting.
        reconnector.apply(Event::RetryRequested);

        let started = Instant::now();
        assert_eq!(
            reconnector.retry.wait_for_retry().await,
            Err(crate::retry::RetryAborted)
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_timeout_counts_as_connection_loss() {
        let mock = MockTransport::new();
        mock.set_latency(Duration::from_secs(30));

        let reconnector = reconnector(&mock);
        let mut status = reconnector.subscribe();
        reconnector.on_request_failed();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Reconnecting);

        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Waiting);
    }
}
