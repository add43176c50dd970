use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backoff::RetryPolicy;
use crate::error::{ConfigError, DispatchError, DropReason};
use crate::executor::DeliveryExecutor;
use crate::history::{DeliveryHistory, InMemoryDeliveryHistory};
use crate::registry::WebhookRegistry;
use crate::signing::{verify_signature, DEFAULT_SIGNATURE_HEADER};
use crate::telemetry::metric_inc;
use crate::types::{
    duration_ms, DeliveryAttempt, DispatcherStats, PublishOutcome, WebhookConfig, WebhookEvent,
    WebhookId,
};
use crate::worker::{worker_loop, SharedReceiver, WorkerContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of worker tasks spawned by `start`.
    pub max_workers: usize,

    /// Capacity of the event queue; publishes beyond it are dropped.
    pub queue_size: usize,

    /// Upper bound on a single HTTP attempt, including reading the response.
    #[serde(rename = "delivery_timeout_ms", with = "duration_ms")]
    pub delivery_timeout: Duration,

    pub signature_header: String,
    pub user_agent: String,

    /// Bytes of response body kept on each attempt record.
    pub response_snippet_limit: usize,

    /// Used for webhooks that do not carry their own policy.
    pub retry_policy: RetryPolicy,

    /// Retry 4xx responses like any other failure.
    pub retry_client_errors: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let max_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            max_workers,
            queue_size: 1_000,
            delivery_timeout: Duration::from_secs(30),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            user_agent: concat!("webhook-dispatch/", env!("CARGO_PKG_VERSION")).to_string(),
            response_snippet_limit: 1_024,
            retry_policy: RetryPolicy::default(),
            retry_client_errors: true,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidDispatcherConfig(
                "max_workers must be greater than zero".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::InvalidDispatcherConfig(
                "queue_size must be greater than zero".to_string(),
            ));
        }
        if self.delivery_timeout.is_zero() {
            return Err(ConfigError::InvalidDispatcherConfig(
                "delivery_timeout must be greater than zero".to_string(),
            ));
        }
        self.retry_policy.validate()
    }
}

/// Webhook dispatch engine.
///
/// Owns the webhook registry, the delivery history, one bounded event queue
/// and a fixed pool of workers. Construct one per process and share it by
/// `Arc`; every method takes `&self`.
///
/// Events may be published before `start`; they wait in the queue (subject to
/// its capacity) until workers come up.
pub struct Dispatcher {
    config: DispatcherConfig,
    ctx: Arc<WorkerContext>,
    queue_tx: mpsc::Sender<WebhookEvent>,
    queue_rx: SharedReceiver,
    shutdown_tx: watch::Sender<bool>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    dropped_events: AtomicU64,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        Self::with_history(config, Arc::new(InMemoryDeliveryHistory::new()))
    }

    /// Like [`Dispatcher::new`] but records attempts into `history`.
    pub fn with_history(
        config: DispatcherConfig,
        history: Arc<dyn DeliveryHistory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let executor = DeliveryExecutor::new(
            config.delivery_timeout,
            &config.user_agent,
            &config.signature_header,
            config.response_snippet_limit,
        )?;

        let ctx = Arc::new(WorkerContext {
            registry: Arc::new(WebhookRegistry::new()),
            history,
            executor,
            default_policy: config.retry_policy.clone(),
            retry_client_errors: config.retry_client_errors,
        });

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_size);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            ctx,
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            shutdown_tx,
            worker_handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            dropped_events: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Spawn `max_workers` workers on the current tokio runtime.
    pub fn start(&self) -> Result<(), DispatchError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DispatchError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadyStarted);
        }

        let mut handles = self
            .worker_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for worker_id in 0..self.config.max_workers {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                self.queue_rx.clone(),
                self.ctx.clone(),
                self.shutdown_tx.subscribe(),
            )));
        }

        tracing::info!(
            target: "webhook_dispatch",
            workers = self.config.max_workers,
            queue_size = self.config.queue_size,
            "Webhook dispatcher started"
        );
        Ok(())
    }

    /// Signal every worker to stop and wait for them to exit.
    ///
    /// Pending backoff sleeps are cut short; an HTTP attempt already in flight
    /// is allowed to finish (bounded by the delivery timeout). Events still in
    /// the queue are abandoned. Calling `stop` more than once is harmless.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let handles: Vec<_> = {
            let mut guard = self
                .worker_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(target: "webhook_dispatch", error = %e, "Worker terminated abnormally");
            }
        }

        tracing::info!(
            target: "webhook_dispatch",
            abandoned = self.queue_depth(),
            "Webhook dispatcher stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// Validate and upsert a webhook. Delivery history is left untouched.
    pub async fn register_webhook(
        &self,
        id: impl Into<WebhookId>,
        config: WebhookConfig,
    ) -> Result<(), ConfigError> {
        let id = id.into();
        config.validate()?;

        tracing::info!(
            target: "webhook_dispatch",
            webhook_id = %id,
            url = %config.url,
            events = ?config.events,
            active = config.active,
            "Registered webhook"
        );
        self.ctx.registry.register(id, config).await;
        Ok(())
    }

    /// Remove a webhook and its delivery history. No-op if unknown.
    ///
    /// Remaining retries for the webhook are abandoned, and an attempt still
    /// in flight is not recorded.
    pub async fn unregister_webhook(&self, id: &str) {
        let history = &self.ctx.history;
        let existed = self
            .ctx
            .registry
            .unregister_with(id, move || history.remove(id))
            .await;

        if existed {
            tracing::info!(target: "webhook_dispatch", webhook_id = %id, "Unregistered webhook");
        }
    }

    pub async fn get_webhook(&self, id: &str) -> Option<WebhookConfig> {
        self.ctx.registry.get(id).await
    }

    pub async fn list_webhooks(&self) -> HashMap<WebhookId, WebhookConfig> {
        self.ctx.registry.list().await
    }

    /// Queue `event` for delivery. Never blocks on capacity and never fails.
    ///
    /// The event is enqueued once, regardless of how many webhooks match;
    /// fan-out happens when a worker picks it up. If no active webhook
    /// subscribes to its type it is discarded. If the queue is full it is
    /// dropped and counted in [`DispatcherStats::dropped_events`].
    pub async fn publish_event(&self, event: WebhookEvent) -> PublishOutcome {
        if self.stopped.load(Ordering::SeqCst) {
            self.record_drop(&event, DropReason::Stopped);
            return PublishOutcome::Dropped(DropReason::Stopped);
        }

        if !self.ctx.registry.has_subscriber(&event.event_type).await {
            tracing::debug!(
                target: "webhook_dispatch",
                event_id = %event.id,
                event_type = %event.event_type,
                "No active webhooks for event, discarding"
            );
            return PublishOutcome::NoMatchingWebhooks;
        }

        let event_id = event.id.clone();
        match self.queue_tx.try_send(event) {
            Ok(()) => {
                metric_inc("webhook.publish.enqueued");
                tracing::debug!(target: "webhook_dispatch", event_id = %event_id, "Queued event");
                PublishOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.record_drop(&event, DropReason::QueueFull);
                PublishOutcome::Dropped(DropReason::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.record_drop(&event, DropReason::Stopped);
                PublishOutcome::Dropped(DropReason::Stopped)
            }
        }
    }

    fn record_drop(&self, event: &WebhookEvent, reason: DropReason) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
        metric_inc("webhook.publish.dropped");
        tracing::warn!(
            target: "webhook_dispatch",
            event_id = %event.id,
            event_type = %event.event_type,
            reason = %reason,
            "Dropping event"
        );
    }

    /// Every recorded attempt for `webhook_id`, oldest first.
    pub async fn get_deliveries(&self, webhook_id: &str) -> Vec<DeliveryAttempt> {
        self.ctx.history.attempts(webhook_id).await
    }

    pub async fn get_stats(&self) -> DispatcherStats {
        let totals = self.ctx.history.totals().await;
        let success_rate = if totals.total == 0 {
            0.0
        } else {
            totals.succeeded as f64 / totals.total as f64 * 100.0
        };

        DispatcherStats {
            total_webhooks: self.ctx.registry.len().await,
            total_deliveries: totals.total,
            successful_deliveries: totals.succeeded,
            failed_deliveries: totals.failed,
            success_rate,
            queue_depth: self.queue_depth(),
            queue_capacity: self.queue_tx.max_capacity(),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }

    /// Check `signature` against `payload` using the webhook's secret.
    ///
    /// Returns `false` for unknown webhooks and webhooks without a secret.
    pub async fn validate_webhook_signature(
        &self,
        webhook_id: &str,
        payload: &[u8],
        signature: &str,
    ) -> bool {
        let Some(config) = self.ctx.registry.get(webhook_id).await else {
            return false;
        };
        let Some(secret) = config.signing_secret() else {
            return false;
        };
        verify_signature(payload, secret, signature)
    }

    fn queue_depth(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Workers also exit when the sender is dropped; this just makes it prompt.
        self.shutdown_tx.send_replace(true);
    }
}
