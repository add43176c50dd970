use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backoff::RetryPolicy;
use crate::error::{ConfigError, DropReason, FailureReason};

/// Pattern that subscribes a webhook to every event type.
pub const WILDCARD_EVENT: &str = "*";

/// Unique identifier for a registered webhook.
///
/// Strongly typed so webhook IDs are not mixed up with event IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(pub String);

/// Caller-supplied identifier for an event. Used for correlation only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(WebhookId);
string_id!(EventId);

/// Registration record for one remote endpoint.
///
/// Pure configuration: it is replaced wholesale on re-registration and
/// never mutated by the dispatcher.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL; deliveries are `POST`ed here.
    pub url: String,

    /// Shared HMAC secret. `None` or empty means deliveries are unsigned.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,

    /// Subscribed event types. Empty, or containing `"*"`, means all events.
    #[serde(default)]
    pub events: BTreeSet<String>,

    /// Static headers added to every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Inactive webhooks never receive deliveries.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Overrides the dispatcher-wide retry policy when set.
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

fn default_active() -> bool {
    true
}

impl WebhookConfig {
    /// Create an active, unsigned webhook subscribed to every event type.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            events: BTreeSet::new(),
            headers: BTreeMap::new(),
            active: true,
            retry_policy: None,
        }
    }

    /// Sign deliveries with this secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Subscribe to the given event types (replaces any previous set).
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Secret to sign with, if deliveries are signed at all.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Whether this webhook's pattern set selects `event_type`.
    ///
    /// Ignores the `active` flag; see [`WebhookConfig::accepts`].
    pub fn matches(&self, event_type: &str) -> bool {
        self.events.is_empty()
            || self.events.contains(WILDCARD_EVENT)
            || self.events.contains(event_type)
    }

    /// Active and subscribed to `event_type`.
    pub fn accepts(&self, event_type: &str) -> bool {
        self.active && self.matches(event_type)
    }

    /// Reject configs that could never be delivered as written.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        for (name, value) in &self.headers {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeader(format!("bad header name {name:?}")))?;
            reqwest::header::HeaderValue::from_str(value)
                .map_err(|_| ConfigError::InvalidHeader(format!("bad value for header {name:?}")))?;
        }

        if let Some(policy) = &self.retry_policy {
            policy.validate()?;
        }
        Ok(())
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "<REDACTED>"))
            .field("events", &self.events)
            .field("headers", &self.headers)
            .field("active", &self.active)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

/// A notification that something happened inside the platform.
///
/// Serialized as the request body:
/// `{"id", "event", "timestamp" (RFC 3339), "data", "source"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: EventId,

    #[serde(rename = "event")]
    pub event_type: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub data: Map<String, Value>,

    #[serde(default)]
    pub source: String,
}

impl WebhookEvent {
    /// Create an event stamped with the current time and no data.
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: EventId(id.into()),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data: Map::new(),
            source: String::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Exact bytes that are signed and transmitted.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Record of a single HTTP request made for one (webhook, event) pair.
///
/// Appended to history as soon as the attempt completes; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// `"{event_id}-{sequence}"`, unique within the process.
    pub id: String,
    pub webhook_id: WebhookId,
    pub event_id: EventId,
    pub url: String,
    pub payload: Vec<u8>,

    /// HTTP status, or 0 if no response was received.
    pub status_code: u16,

    /// Leading bytes of the response body (lossy UTF-8).
    pub response: String,

    /// 1-based.
    pub attempt: u32,

    /// True iff `status_code` is in `200..300`.
    pub succeeded: bool,

    /// Transport error text; `None` whenever a response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,

    pub timestamp: DateTime<Utc>,

    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

/// Snapshot returned by [`Dispatcher::get_stats`](crate::Dispatcher::get_stats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub total_webhooks: usize,
    pub total_deliveries: usize,
    pub successful_deliveries: usize,
    pub failed_deliveries: usize,

    /// Percentage of successful attempts, `0.0` when nothing was attempted.
    pub success_rate: f64,

    pub queue_depth: usize,
    pub queue_capacity: usize,

    /// Events discarded because the queue was full or the dispatcher stopped.
    pub dropped_events: u64,
}

/// What `publish_event` did with an event. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Enqueued once for later fan-out.
    Queued,

    /// No active webhook subscribes to this event type; discarded.
    NoMatchingWebhooks,

    /// Discarded before reaching the queue.
    Dropped(DropReason),
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
