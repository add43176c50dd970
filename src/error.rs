use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised synchronously when configuration is rejected.
///
/// Returned by [`Dispatcher::new`](crate::Dispatcher::new) and
/// [`Dispatcher::register_webhook`](crate::Dispatcher::register_webhook).
/// Nothing is registered or started when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Retry policy violates one of its invariants.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// Target URL could not be parsed or uses an unsupported scheme.
    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A static or signature header name/value is not valid HTTP.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Dispatcher-wide settings are out of range.
    #[error("invalid dispatcher config: {0}")]
    InvalidDispatcherConfig(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

/// Errors returned when the dispatcher lifecycle is misused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// `start` was called on a dispatcher whose workers are already running.
    #[error("dispatcher already started")]
    AlreadyStarted,

    /// Dispatcher has been stopped and cannot be restarted.
    #[error("dispatcher is stopped")]
    Stopped,
}

/// Why a single delivery attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum FailureReason {
    /// The request did not complete within the delivery timeout.
    Timeout,
    /// TCP/TLS connection could not be established.
    Connect,
    /// Any other transport failure (DNS, reset, malformed response).
    Network,
    /// Endpoint answered with a 4xx status.
    ClientError(u16),
    /// Endpoint answered with any other non-2xx status.
    RemoteError(u16),
}

impl FailureReason {
    /// Classify a received, unsuccessful HTTP status.
    pub fn from_status(status: u16) -> Self {
        if (400..500).contains(&status) {
            FailureReason::ClientError(status)
        } else {
            FailureReason::RemoteError(status)
        }
    }

    /// True when the request never produced a response.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FailureReason::Timeout | FailureReason::Connect | FailureReason::Network
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "request timed out"),
            FailureReason::Connect => write!(f, "connection failed"),
            FailureReason::Network => write!(f, "network error"),
            FailureReason::ClientError(status) => write!(f, "client error (status {status})"),
            FailureReason::RemoteError(status) => write!(f, "remote error (status {status})"),
        }
    }
}

/// Reasons an event was discarded without being enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Internal queue is at capacity.
    QueueFull,

    /// Dispatcher has been stopped.
    Stopped,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::QueueFull => write!(f, "event queue full"),
            DropReason::Stopped => write!(f, "dispatcher stopped"),
        }
    }
}
