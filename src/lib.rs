//! An in-process webhook dispatch engine.
//!
//! Internal subsystems publish [`WebhookEvent`]s; the [`Dispatcher`] matches
//! them against registered webhooks, queues each event once, and a fixed pool
//! of workers delivers it to every matching endpoint with HMAC-SHA256 signing
//! and exponential-backoff retries. Every attempt is kept in an in-memory
//! delivery history for inspection.
//!
//! ## Guarantees
//! - Bounded memory for queued work (fixed-capacity queue)
//! - Publishing never blocks and never fails the caller
//! - Attempts for one (webhook, event) pair are strictly ordered
//! - Prompt shutdown: backoff sleeps are interrupted by `stop`
//!
//! ## Non-Guarantees
//! - Durability across restarts (nothing is persisted)
//! - Delivery of events dropped under backpressure
//! - Ordering across different events
//!
//! ```no_run
//! use webhook_dispatch::{Dispatcher, DispatcherConfig, WebhookConfig, WebhookEvent};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::new(DispatcherConfig::default())?;
//! dispatcher
//!     .register_webhook(
//!         "audit",
//!         WebhookConfig::new("https://example.com/hooks")
//!             .with_secret("s3cr3t")
//!             .with_events(["file.uploaded"]),
//!     )
//!     .await?;
//! dispatcher.start()?;
//!
//! dispatcher
//!     .publish_event(WebhookEvent::new("evt-1", "file.uploaded").with_data("name", "report.pdf"))
//!     .await;
//!
//! dispatcher.stop().await;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod dispatcher;
mod error;
mod executor;
mod history;
mod registry;
mod signing;
mod telemetry;
mod types;
mod worker;

pub use backoff::RetryPolicy;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{ConfigError, DispatchError, DropReason, FailureReason};
pub use executor::DeliveryExecutor;
pub use history::{DeliveryHistory, DeliveryTotals, InMemoryDeliveryHistory};
pub use registry::WebhookRegistry;
pub use signing::{
    parse_signature_header,
    sign_payload,
    verify_signature,
    verify_webhook_request,
    VerificationError,
    DEFAULT_SIGNATURE_HEADER,
    SIGNATURE_PREFIX,
};
pub use types::{
    DeliveryAttempt,
    DispatcherStats,
    EventId,
    PublishOutcome,
    WebhookConfig,
    WebhookEvent,
    WebhookId,
    WILDCARD_EVENT,
};
