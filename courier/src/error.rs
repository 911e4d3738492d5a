//! Error taxonomy surfaced to callers of the pipeline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

/// Protocol error bodies are truncated to this many bytes.
pub const MAX_ERROR_BODY: usize = 1024;

/// Network-level failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not establish a connection.
    Connect,
    /// Connection dropped while sending the request or reading the body.
    Reset,
    /// A single attempt exceeded the connector's own deadline.
    TimedOut,
    /// Anything else the HTTP stack reported.
    Other,
}

/// Failure of one call through the pipeline.
///
/// `Clone` so that one in-flight execution can hand the identical failure to
/// every subscriber waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Connection or I/O failure, after retries were exhausted.
    #[error("transport error ({kind:?}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
        #[source]
        source: Option<Arc<reqwest::Error>>,
    },

    /// The request-scoped deadline elapsed.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// Upstream answered with a status outside `200..=299`.
    #[error("upstream responded with status {status}")]
    Protocol {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },

    /// Required context is missing. Raised before any network call.
    #[error("invalid client configuration: {0}")]
    Configuration(String),

    /// The caller's cancellation signal fired.
    #[error("request cancelled")]
    Cancelled,

    /// The response body could not be decoded into the requested type.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] Arc<serde_json::Error>),

    /// A stage broke an internal contract (e.g. finished without a response).
    #[error("internal pipeline error: {0}")]
    Internal(String),
}

/// Alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a protocol error, keeping at most [`MAX_ERROR_BODY`] bytes of body.
    pub fn protocol(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let body = if body.len() > MAX_ERROR_BODY {
            body.slice(..MAX_ERROR_BODY)
        } else {
            body
        };
        Error::Protocol {
            status,
            headers,
            body,
        }
    }

    /// Builds a transport error without an underlying source.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Error::Transport {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Whether this is a network-class failure eligible for retry.
    pub fn is_retryable_network(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// HTTP status carried by a protocol error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the call was cancelled by its caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether the request-scoped deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_connect() {
            TransportErrorKind::Connect
        } else if error.is_timeout() {
            TransportErrorKind::TimedOut
        } else if error.is_body() || error.is_request() {
            TransportErrorKind::Reset
        } else {
            TransportErrorKind::Other
        };
        Error::Transport {
            kind,
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Decode(Arc::new(error))
    }
}
