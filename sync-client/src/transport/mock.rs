//! Mock transport for testing.
//!
//! Allows queueing responses per call and capturing requests for
//! verification.

use super::{HomeServerApi, MessagesRequest, SyncRequest};
use crate::util::lock;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_types::{
    ApiError, CreateFilterResponse, EventId, FilterDefinition, MessagesResponse, RoomId,
    SendResponse, SyncResponse, TxnId, UserId, VersionsResponse,
};

/// A request seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// `sync()`.
    Sync(SyncRequest),
    /// `create_filter()`.
    CreateFilter(UserId),
    /// `send()`.
    Send {
        /// Target room.
        room_id: RoomId,
        /// Event type.
        event_type: String,
        /// Transaction id.
        txn_id: TxnId,
        /// Event content.
        content: Value,
    },
    /// `messages()`.
    Messages(MessagesRequest),
    /// `versions()`.
    Versions,
}

/// Mock transport for testing.
///
/// When a queue is empty the mock falls back to a default: `sync()` never
/// completes, `send()` echoes an event id derived from the transaction id,
/// `create_filter()` returns `"filter0"`, `versions()` succeeds and
/// `messages()` fails with `M_NOT_FOUND`.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    calls: Vec<MockCall>,
    sync_queue: VecDeque<Result<SyncResponse, ApiError>>,
    filter_queue: VecDeque<Result<CreateFilterResponse, ApiError>>,
    send_queue: VecDeque<Result<SendResponse, ApiError>>,
    messages_queue: VecDeque<Result<MessagesResponse, ApiError>>,
    versions_queue: VecDeque<Result<VersionsResponse, ApiError>>,
    latency: Option<Duration>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `sync()` call.
    pub fn queue_sync(&self, result: Result<SyncResponse, ApiError>) {
        lock(&self.inner).sync_queue.push_back(result);
    }

    /// Queue the result of the next `create_filter()` call.
    pub fn queue_filter(&self, result: Result<CreateFilterResponse, ApiError>) {
        lock(&self.inner).filter_queue.push_back(result);
    }

    /// Queue the result of the next `send()` call.
    pub fn queue_send(&self, result: Result<SendResponse, ApiError>) {
        lock(&self.inner).send_queue.push_back(result);
    }

    /// Queue the result of the next `messages()` call.
    pub fn queue_messages(&self, result: Result<MessagesResponse, ApiError>) {
        lock(&self.inner).messages_queue.push_back(result);
    }

    /// Queue the result of the next `versions()` call.
    pub fn queue_versions(&self, result: Result<VersionsResponse, ApiError>) {
        lock(&self.inner).versions_queue.push_back(result);
    }

    /// Delay every call by this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.inner).latency = Some(latency);
    }

    /// Get all calls that were made.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.inner).calls.clone()
    }

    /// Get the `send()` calls that were made.
    pub fn sent(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::Send { .. }))
            .collect()
    }

    /// Number of `sync()` calls made.
    pub fn sync_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Sync(_)))
    }

    /// Number of `versions()` calls made.
    pub fn versions_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Versions))
    }

    /// Clear all state (calls and queues).
    pub fn reset(&self) {
        *lock(&self.inner) = MockTransportInner::default();
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.inner).calls.iter().filter(|c| pred(c)).count()
    }

    /// Record a call and hand back the configured latency.
    fn record(&self, call: MockCall) -> Option<Duration> {
        let mut inner = lock(&self.inner);
        inner.calls.push(call);
        inner.latency
    }

    async fn delay(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl HomeServerApi for MockTransport {
    async fn sync(&self, request: SyncRequest) -> Result<SyncResponse, ApiError> {
        let latency = self.record(MockCall::Sync(request));
        Self::delay(latency).await;

        let next = lock(&self.inner).sync_queue.pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn create_filter(
        &self,
        user_id: &UserId,
        _filter: &FilterDefinition,
    ) -> Result<CreateFilterResponse, ApiError> {
        let latency = self.record(MockCall::CreateFilter(user_id.clone()));
        Self::delay(latency).await;

        let next = lock(&self.inner).filter_queue.pop_front();
        next.unwrap_or_else(|| {
            Ok(CreateFilterResponse {
                filter_id: "filter0".into(),
            })
        })
    }

    async fn send(
        &self,
        room_id: &RoomId,
        event_type: &str,
        txn_id: &TxnId,
        content: &Value,
    ) -> Result<SendResponse, ApiError> {
        let latency = self.record(MockCall::Send {
            room_id: room_id.clone(),
            event_type: event_type.to_string(),
            txn_id: txn_id.clone(),
            content: content.clone(),
        });
        Self::delay(latency).await;

        let next = lock(&self.inner).send_queue.pop_front();
        next.unwrap_or_else(|| {
            Ok(SendResponse {
                event_id: EventId::new(format!("${}", txn_id)),
            })
        })
    }

    async fn messages(&self, request: MessagesRequest) -> Result<MessagesResponse, ApiError> {
        let latency = self.record(MockCall::Messages(request));
        Self::delay(latency).await;

        let next = lock(&self.inner).messages_queue.pop_front();
        next.unwrap_or_else(|| {
            Err(ApiError::Server {
                status: 404,
                errcode: "M_NOT_FOUND".into(),
                message: "no response queued".into(),
            })
        })
    }

    async fn versions(&self) -> Result<VersionsResponse, ApiError> {
        let latency = self.record(MockCall::Versions);
        Self::delay(latency).await;

        let next = lock(&self.inner).versions_queue.pop_front();
        next.unwrap_or_else(|| {
            Ok(VersionsResponse {
                versions: vec!["v1.11".into()],
            })
        })
    }
}
