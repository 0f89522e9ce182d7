//! HTTP transport on reqwest, speaking the Matrix client-server API v3.

use super::{HomeServerApi, MessagesRequest, SyncRequest};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use sync_types::{
    ApiError, CreateFilterResponse, Direction, FilterDefinition, MatrixErrorBody,
    MessagesResponse, RoomId, SendResponse, SyncResponse, TxnId, UserId, VersionsResponse,
};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Matrix homeserver transport over HTTPS.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    access_token: String,
}

impl HttpTransport {
    /// Create a transport for `homeserver_url`, authenticating with `access_token`.
    pub fn new(homeserver_url: &str, access_token: &str) -> Result<Self, ApiError> {
        let base = Url::parse(homeserver_url)
            .map_err(|e| ApiError::InvalidConfig(format!("invalid homeserver url: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidConfig(format!(
                "invalid homeserver url: {}",
                homeserver_url
            )));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            base,
            access_token: access_token.to_string(),
        })
    }

    /// Build an endpoint URL from path segments. Each segment is
    /// percent-encoded, so room ids and transaction ids are safe to pass.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidConfig("homeserver url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn client_v3(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut full = vec!["_matrix", "client", "v3"];
        full.extend_from_slice(segments);
        self.endpoint(&full)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(classify);
        }

        let body = response.json::<MatrixErrorBody>().await.ok();
        debug!(status = status.as_u16(), errcode = ?body.as_ref().map(|b| &b.errcode), "request failed");
        Err(ApiError::from_status(status.as_u16(), body))
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base", &self.base.as_str())
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Map a reqwest failure onto the API error classes.
fn classify(error: reqwest::Error) -> ApiError {
    if error.is_decode() {
        ApiError::Decode(error.to_string())
    } else {
        // connect, timeout, reset and body read failures
        ApiError::Connection(error.to_string())
    }
}

/// `/messages` returns newest-first for backward pagination.
fn chronological(mut response: MessagesResponse, dir: Direction) -> MessagesResponse {
    if dir == Direction::Backward {
        if let Some(chunk) = response.chunk.as_mut() {
            chunk.reverse();
        }
    }
    response
}

#[async_trait]
impl HomeServerApi for HttpTransport {
    async fn sync(&self, request: SyncRequest) -> Result<SyncResponse, ApiError> {
        let mut url = self.client_v3(&["sync"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(since) = &request.since {
                query.append_pair("since", since);
            }
            if let Some(filter) = &request.filter_id {
                query.append_pair("filter", filter);
            }
            query.append_pair("timeout", &request.timeout.as_millis().to_string());
        }
        let mut builder = self.client.get(url);
        if let Some(timeout) = request.request_timeout {
            builder = builder.timeout(timeout);
        }
        self.execute(builder).await
    }

    async fn create_filter(
        &self,
        user_id: &UserId,
        filter: &FilterDefinition,
    ) -> Result<CreateFilterResponse, ApiError> {
        let url = self.client_v3(&["user", user_id.as_str(), "filter"])?;
        self.execute(self.client.post(url).json(filter)).await
    }

    async fn send(
        &self,
        room_id: &RoomId,
        event_type: &str,
        txn_id: &TxnId,
        content: &Value,
    ) -> Result<SendResponse, ApiError> {
        let url = self.client_v3(&[
            "rooms",
            room_id.as_str(),
            "send",
            event_type,
            txn_id.as_str(),
        ])?;
        self.execute(self.client.put(url).json(content)).await
    }

    async fn messages(&self, request: MessagesRequest) -> Result<MessagesResponse, ApiError> {
        let mut url = self.client_v3(&["rooms", request.room_id.as_str(), "messages"])?;
        url.query_pairs_mut()
            .append_pair("from", &request.from)
            .append_pair("dir", request.dir.as_str())
            .append_pair("limit", &request.limit.to_string());
        let response: MessagesResponse = self.execute(self.client.get(url)).await?;
        Ok(chronological(response, request.dir))
    }

    async fn versions(&self) -> Result<VersionsResponse, ApiError> {
        let url = self.endpoint(&["_matrix", "client", "versions"])?;
        self.execute(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport() -> HttpTransport {
        HttpTransport::new("https://matrix.example.org/", "secret-token").unwrap()
    }

    #[test]
    fn endpoints_encode_identifiers() {
        let url = transport()
            .client_v3(&["rooms", "!abc:example.org", "send", "m.room.message", "t/1"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/client/v3/rooms/!abc:example.org/send/m.room.message/t%2F1"
        );
    }

    #[test]
    fn versions_endpoint_is_unversioned() {
        let url = transport()
            .endpoint(&["_matrix", "client", "versions"])
            .unwrap();
        assert_eq!(url.as_str(), "https://matrix.example.org/_matrix/client/versions");
    }

    #[test]
    fn rejects_invalid_url_as_configuration_error() {
        for url in ["not a url", "mailto:me@example.org"] {
            let error = HttpTransport::new(url, "t").unwrap_err();
            assert!(matches!(error, ApiError::InvalidConfig(_)), "{url}: {error:?}");
            assert!(!error.is_connection());
        }
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", transport());
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn backward_chunks_are_reversed() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "start": "t0",
            "end": "t1",
            "chunk": [
                {"event_id": "$2", "type": "m.room.message", "sender": "@a:x"},
                {"event_id": "$1", "type": "m.room.message", "sender": "@a:x"}
            ]
        }))
        .unwrap();

        let response = chronological(response, Direction::Backward);
        let ids: Vec<_> = response
            .chunk
            .unwrap()
            .iter()
            .map(|e| e.event_id.to_string())
            .collect();
        assert_eq!(ids, vec!["$1", "$2"]);
    }
}
