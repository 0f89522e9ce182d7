//! Error types for the homeserver API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Matrix error code returned when the client is being rate limited.
pub const M_LIMIT_EXCEEDED: &str = "M_LIMIT_EXCEEDED";

/// Standard Matrix error response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixErrorBody {
    /// Error code, e.g. `M_FORBIDDEN`.
    #[serde(default)]
    pub errcode: String,
    /// Human readable message.
    #[serde(default)]
    pub error: String,
    /// Rate limit advice, only present on `M_LIMIT_EXCEEDED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Errors produced by a homeserver API call.
///
/// The classification drives recovery: connection errors go to the
/// reconnector, rate limits are absorbed by the scheduler, aborts are
/// ignorable, and everything else is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server could not be reached (DNS, refused, reset, timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// The server asked us to slow down.
    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited {
        /// Server advice on how long to wait, if any.
        retry_after_ms: Option<u64>,
    },

    /// The server answered with an error status.
    #[error("server error {status} {errcode}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Matrix error code.
        errcode: String,
        /// Human readable message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The request was aborted by the client.
    #[error("request aborted")]
    Aborted,

    /// The transport is misconfigured (bad homeserver URL, TLS setup).
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    /// Build an error from a non-success status and its (possibly empty) body.
    pub fn from_status(status: u16, body: Option<MatrixErrorBody>) -> Self {
        let body = body.unwrap_or_default();
        if status == 429 || body.errcode == M_LIMIT_EXCEEDED {
            return ApiError::RateLimited {
                retry_after_ms: body.retry_after_ms,
            };
        }
        ApiError::Server {
            status,
            errcode: body.errcode,
            message: body.error,
        }
    }

    /// Whether this is a network connectivity failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, ApiError::Connection(_))
    }

    /// Whether this is a client-side abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ApiError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ApiError::Server {
            status: 403,
            errcode: "M_FORBIDDEN".into(),
            message: "nope".into(),
        };
        assert_eq!(err.to_string(), "server error 403 M_FORBIDDEN: nope");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ApiError>();
    }

    #[test]
    fn status_429_is_rate_limited() {
        let err = ApiError::from_status(429, None);
        assert_eq!(
            err,
            ApiError::RateLimited {
                retry_after_ms: None
            }
        );
    }

    #[test]
    fn limit_exceeded_carries_advice() {
        let body: MatrixErrorBody = serde_json::from_str(
            r#"{"errcode":"M_LIMIT_EXCEEDED","error":"slow down","retry_after_ms":500}"#,
        )
        .unwrap();
        let err = ApiError::from_status(400, Some(body));
        assert_eq!(
            err,
            ApiError::RateLimited {
                retry_after_ms: Some(500)
            }
        );
    }

    #[test]
    fn classification_helpers() {
        assert!(ApiError::Connection("reset".into()).is_connection());
        assert!(ApiError::Aborted.is_aborted());
        assert!(!ApiError::Decode("bad".into()).is_connection());
        assert!(!ApiError::InvalidConfig("bad url".into()).is_connection());
    }
}
