//! Request scheduler - the single channel all homeserver calls go through.
//!
//! Every call runs in its own task and is retried transparently while the
//! server rate limits it. Connection errors are reported to the
//! [`Reconnector`] and then handed to the caller like any other error.
//!
//! Each call returns an [`Abortable`] handle. Live calls are tracked so
//! [`RequestScheduler::stop`] can abort them all.

use crate::reconnector::Reconnector;
use crate::retry::ExponentialRetryDelay;
use crate::transport::{HomeServerApi, MessagesRequest, SyncRequest};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_types::{
    ApiError, CreateFilterResponse, FilterDefinition, MessagesResponse, RoomId, SendResponse,
    SyncResponse, TxnId, UserId, VersionsResponse,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a scheduled request.
#[derive(Debug)]
pub struct Abortable<T> {
    response: oneshot::Receiver<Result<T, ApiError>>,
    token: CancellationToken,
}

impl<T> Abortable<T> {
    /// Wait for the result.
    pub async fn response(self) -> Result<T, ApiError> {
        self.response.await.unwrap_or(Err(ApiError::Aborted))
    }

    /// Abort the request. Its result becomes [`ApiError::Aborted`].
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// A handle that can abort the request after `self` is consumed.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.token.clone())
    }
}

/// Aborts one scheduled request.
#[derive(Debug, Clone)]
pub struct AbortHandle(CancellationToken);

impl AbortHandle {
    /// Abort the request.
    pub fn abort(&self) {
        self.0.cancel();
    }
}

/// A repeatable homeserver call.
pub type Call<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

struct SchedulerInner {
    live: DashMap<u64, CancellationToken>,
    next_id: AtomicU64,
    stopped: AtomicBool,
    retry_start: Duration,
    retry_max: Duration,
}

/// Serializes homeserver calls and absorbs rate limiting.
pub struct RequestScheduler<A: HomeServerApi> {
    api: Arc<A>,
    reconnector: Option<Arc<Reconnector<A>>>,
    inner: Arc<SchedulerInner>,
}

impl<A: HomeServerApi> Clone for RequestScheduler<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            reconnector: self.reconnector.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: HomeServerApi> RequestScheduler<A> {
    /// Create a scheduler over `api`.
    ///
    /// `retry_start` / `retry_max` bound the backoff used for rate limits
    /// that come without a `retry_after_ms` hint.
    pub fn new(
        api: Arc<A>,
        reconnector: Option<Arc<Reconnector<A>>>,
        retry_start: Duration,
        retry_max: Duration,
    ) -> Self {
        Self {
            api,
            reconnector,
            inner: Arc::new(SchedulerInner {
                live: DashMap::new(),
                next_id: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                retry_start,
                retry_max,
            }),
        }
    }

    /// Abort every live request and reject new ones until [`start`](Self::start).
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        for entry in self.inner.live.iter() {
            entry.value().cancel();
        }
        debug!(aborted = self.inner.live.len(), "scheduler stopped");
    }

    /// Accept requests again.
    pub fn start(&self) {
        self.inner.stopped.store(false, Ordering::SeqCst);
    }

    /// Check if the scheduler is stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Number of requests in flight.
    pub fn live_requests(&self) -> usize {
        self.inner.live.len()
    }

    /// Schedule `call`, retrying it while rate limited.
    pub fn request<T: Send + 'static>(&self, method: &'static str, call: Call<T>) -> Abortable<T> {
        let (tx, rx) = oneshot::channel();
        let token = CancellationToken::new();
        let handle = Abortable {
            response: rx,
            token: token.clone(),
        };

        // Register first: a concurrent stop() either sweeps this entry or is
        // seen by the check below.
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.live.insert(id, token.clone());
        if self.is_stopped() {
            self.inner.live.remove(&id);
            let _ = tx.send(Err(ApiError::Aborted));
            return handle;
        }
        let inner = Arc::clone(&self.inner);
        let reconnector = self.reconnector.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ApiError::Aborted),
                result = run_with_retries(method, &call, inner.retry_start, inner.retry_max) => result,
            };
            inner.live.remove(&id);

            if let Err(error) = &result {
                if error.is_connection() {
                    warn!(method, %error, "request failed, connection lost");
                    if let Some(reconnector) = &reconnector {
                        reconnector.on_request_failed();
                    }
                }
            }
            let _ = tx.send(result);
        });
        handle
    }

    /// Schedule a `/sync` request.
    pub fn sync(&self, request: SyncRequest) -> Abortable<SyncResponse> {
        let api = Arc::clone(&self.api);
        self.request(
            "sync",
            Box::new(move || {
                let api = Arc::clone(&api);
                let request = request.clone();
                async move { api.sync(request).await }.boxed()
            }),
        )
    }

    /// Schedule a filter creation.
    pub fn create_filter(
        &self,
        user_id: UserId,
        filter: FilterDefinition,
    ) -> Abortable<CreateFilterResponse> {
        let api = Arc::clone(&self.api);
        self.request(
            "create_filter",
            Box::new(move || {
                let api = Arc::clone(&api);
                let user_id = user_id.clone();
                let filter = filter.clone();
                async move { api.create_filter(&user_id, &filter).await }.boxed()
            }),
        )
    }

    /// Schedule a room event send.
    pub fn send(
        &self,
        room_id: RoomId,
        event_type: String,
        txn_id: TxnId,
        content: Value,
    ) -> Abortable<SendResponse> {
        let api = Arc::clone(&self.api);
        self.request(
            "send",
            Box::new(move || {
                let api = Arc::clone(&api);
                let (room_id, event_type, txn_id, content) = (
                    room_id.clone(),
                    event_type.clone(),
                    txn_id.clone(),
                    content.clone(),
                );
                async move { api.send(&room_id, &event_type, &txn_id, &content).await }.boxed()
            }),
        )
    }

    /// Schedule a `/messages` request.
    pub fn messages(&self, request: MessagesRequest) -> Abortable<MessagesResponse> {
        let api = Arc::clone(&self.api);
        self.request(
            "messages",
            Box::new(move || {
                let api = Arc::clone(&api);
                let request = request.clone();
                async move { api.messages(request).await }.boxed()
            }),
        )
    }

    /// Schedule a `/versions` request.
    pub fn versions(&self) -> Abortable<VersionsResponse> {
        let api = Arc::clone(&self.api);
        self.request(
            "versions",
            Box::new(move || {
                let api = Arc::clone(&api);
                async move { api.versions().await }.boxed()
            }),
        )
    }
}

async fn run_with_retries<T>(
    method: &'static str,
    call: &Call<T>,
    retry_start: Duration,
    retry_max: Duration,
) -> Result<T, ApiError> {
    // Created on the first rate limit without a hint.
    let mut delay: Option<ExponentialRetryDelay> = None;
    loop {
        match call().await {
            Err(ApiError::RateLimited {
                retry_after_ms: Some(ms),
            }) => {
                debug!(method, delay_ms = ms, "rate limited");
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Err(ApiError::RateLimited {
                retry_after_ms: None,
            }) => {
                let delay =
                    delay.get_or_insert_with(|| ExponentialRetryDelay::new(retry_start, retry_max));
                debug!(method, delay_ms = delay.next_value().as_millis() as u64, "rate limited");
                let _ = delay.wait_for_retry().await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use sync_core::ConnectionStatus;
    use tokio::time::Instant;

    fn scheduler(mock: &MockTransport) -> RequestScheduler<MockTransport> {
        RequestScheduler::new(
            Arc::new(mock.clone()),
            None,
            Duration::from_secs(2),
            Duration::from_secs(60),
        )
    }

    fn sync_response(token: &str) -> SyncResponse {
        SyncResponse {
            next_batch: token.into(),
            ..SyncResponse::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_with_hint_waits_exactly() {
        let mock = MockTransport::new();
        mock.queue_sync(Err(ApiError::RateLimited {
            retry_after_ms: Some(500),
        }));
        mock.queue_sync(Ok(sync_response("s1")));

        let started = Instant::now();
        let response = scheduler(&mock)
            .sync(SyncRequest::default())
            .response()
            .await
            .unwrap();

        assert_eq!(response.next_batch, "s1");
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(mock.sync_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_without_hint_backs_off() {
        let mock = MockTransport::new();
        for _ in 0..2 {
            mock.queue_versions(Err(ApiError::RateLimited {
                retry_after_ms: None,
            }));
        }

        let started = Instant::now();
        scheduler(&mock).versions().response().await.unwrap();

        // 2 s then 4 s
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert!(started.elapsed() < Duration::from_secs(7));
        assert_eq!(mock.versions_count(), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let mock = MockTransport::new();
        mock.queue_versions(Err(ApiError::Server {
            status: 500,
            errcode: "M_UNKNOWN".into(),
            message: "boom".into(),
        }));

        let result = scheduler(&mock).versions().response().await;
        assert!(matches!(result, Err(ApiError::Server { status: 500, .. })));
        assert_eq!(mock.versions_count(), 1);
    }

    #[tokio::test]
    async fn abort_before_dispatch_rejects_without_calling() {
        let mock = MockTransport::new();
        let request = scheduler(&mock).versions();
        request.abort();

        assert_eq!(request.response().await, Err(ApiError::Aborted));
        assert_eq!(mock.versions_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_after_dispatch_rejects() {
        let mock = MockTransport::new();
        let scheduler = scheduler(&mock);
        let request = scheduler.sync(SyncRequest::default());
        let handle = request.abort_handle();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.sync_count(), 1);
        assert_eq!(scheduler.live_requests(), 1);

        handle.abort();
        assert_eq!(request.response().await.map(|_| ()), Err(ApiError::Aborted));
        assert_eq!(scheduler.live_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_live_and_rejects_new_until_start() {
        let mock = MockTransport::new();
        let scheduler = scheduler(&mock);
        let pending = scheduler.sync(SyncRequest::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        scheduler.stop();
        assert_eq!(pending.response().await.map(|_| ()), Err(ApiError::Aborted));
        assert_eq!(
            scheduler.versions().response().await,
            Err(ApiError::Aborted)
        );

        scheduler.start();
        assert!(scheduler.versions().response().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn requests_racing_stop_are_all_aborted() {
        // Unanswered syncs never complete, so only an abort ends them.
        let mock = MockTransport::new();
        let scheduler = scheduler(&mock);

        let issuer = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let mut requests = Vec::new();
                for _ in 0..500 {
                    requests.push(scheduler.sync(SyncRequest::default()));
                    tokio::task::yield_now().await;
                }
                requests
            })
        };
        tokio::task::yield_now().await;
        scheduler.stop();

        for request in issuer.await.unwrap() {
            let result = tokio::time::timeout(Duration::from_secs(5), request.response())
                .await
                .expect("request outlived stop()");
            assert_eq!(result.map(|_| ()), Err(ApiError::Aborted));
        }
        assert_eq!(scheduler.live_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_errors_reach_reconnector() {
        let mock = MockTransport::new();
        mock.set_latency(Duration::from_millis(50));
        mock.queue_send(Err(ApiError::Connection("reset".into())));

        let api = Arc::new(mock.clone());
        let reconnector = Reconnector::new(
            Arc::clone(&api),
            Duration::from_secs(10),
            Duration::from_secs(2),
            Duration::from_secs(60),
        );
        let scheduler = RequestScheduler::new(
            api,
            Some(Arc::clone(&reconnector)),
            Duration::from_secs(2),
            Duration::from_secs(60),
        );

        let result = scheduler
            .send(
                RoomId::new("!r:example.org"),
                "m.room.message".into(),
                TxnId::new("t1"),
                serde_json::json!({}),
            )
            .response()
            .await;

        assert!(matches!(result, Err(ApiError::Connection(_))));
        assert_eq!(reconnector.status(), ConnectionStatus::Reconnecting);
    }
}
