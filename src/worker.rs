use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;

use crate::backoff::RetryPolicy;
use crate::error::FailureReason;
use crate::executor::DeliveryExecutor;
use crate::history::DeliveryHistory;
use crate::registry::WebhookRegistry;
use crate::telemetry::metric_inc;
use crate::types::{WebhookConfig, WebhookEvent, WebhookId};

/// Receiving half of the event queue, shared by every worker.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<WebhookEvent>>>;

/// State shared by the dispatcher and all of its workers.
pub(crate) struct WorkerContext {
    pub registry: Arc<WebhookRegistry>,
    pub history: Arc<dyn DeliveryHistory>,
    pub executor: DeliveryExecutor,

    /// Used for webhooks without their own policy.
    pub default_policy: RetryPolicy,

    /// When false, a 4xx response ends the delivery without retrying.
    pub retry_client_errors: bool,
}

/// Whether a worker should keep pulling events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stopped,
}

/// Resolves once stop is requested or the dispatcher is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// Main worker loop.
///
/// Each worker:
/// - Pulls one event at a time from the shared queue
/// - Re-resolves the active, matching webhooks for it
/// - Delivers to each webhook in turn, retrying with backoff
/// - Exits as soon as shutdown is signalled, even mid-backoff
pub(crate) async fn worker_loop(
    worker_id: usize,
    rx: SharedReceiver,
    ctx: Arc<WorkerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(target: "webhook_dispatch", worker_id, "Worker started");

    loop {
        let event = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            event = next_event(&rx) => event,
        };

        let Some(event) = event else { break };

        if process_event(&ctx, event, &mut shutdown).await == Flow::Stopped {
            break;
        }
    }

    tracing::debug!(target: "webhook_dispatch", worker_id, "Worker exited");
}

async fn next_event(rx: &Mutex<mpsc::Receiver<WebhookEvent>>) -> Option<WebhookEvent> {
    let mut guard = rx.lock().await;
    guard.recv().await
}

/// Fan one dequeued event out to every webhook that still wants it.
async fn process_event(
    ctx: &WorkerContext,
    event: WebhookEvent,
    shutdown: &mut watch::Receiver<bool>,
) -> Flow {
    // Configuration may have changed since the event was enqueued.
    let subscribers = ctx.registry.subscribers(&event.event_type).await;
    if subscribers.is_empty() {
        tracing::debug!(
            target: "webhook_dispatch",
            event_id = %event.id,
            event_type = %event.event_type,
            "No active webhooks left for event"
        );
        return Flow::Continue;
    }

    let payload = match event.to_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(
                target: "webhook_dispatch",
                event_id = %event.id,
                error = %e,
                "Failed to serialize event"
            );
            return Flow::Continue;
        }
    };

    for webhook_id in subscribers {
        let flow = deliver_with_retries(ctx, &webhook_id, &event, &payload, shutdown).await;
        if flow == Flow::Stopped {
            return Flow::Stopped;
        }
    }

    Flow::Continue
}

/// Attempt delivery until success, retry exhaustion, or shutdown.
///
/// Attempts for one (webhook, event) pair run strictly in order and each one
/// is recorded in history as soon as it completes. The registration is read
/// again before every attempt; the sequence ends once the webhook is removed
/// or stops accepting the event.
async fn deliver_with_retries(
    ctx: &WorkerContext,
    webhook_id: &WebhookId,
    event: &WebhookEvent,
    payload: &[u8],
    shutdown: &mut watch::Receiver<bool>,
) -> Flow {
    let mut attempt = 1;

    loop {
        let Some(config) = current_config(ctx, webhook_id, event).await else {
            tracing::info!(
                target: "webhook_dispatch",
                webhook_id = %webhook_id,
                event_id = %event.id,
                attempts = attempt - 1,
                "Webhook removed or deactivated, abandoning delivery"
            );
            return Flow::Continue;
        };
        let policy = config.retry_policy.as_ref().unwrap_or(&ctx.default_policy);
        let max_attempts = policy.max_retries.saturating_add(1);

        let record = ctx
            .executor
            .attempt(webhook_id, &config, &event.id, payload, attempt)
            .await;
        let succeeded = record.succeeded;
        let failure = record.failure.clone();
        let status = record.status_code;
        let duration = record.duration;

        let history = &ctx.history;
        let recorded = ctx
            .registry
            .while_registered(webhook_id.as_str(), move || history.record(record))
            .await;
        if recorded.is_none() {
            tracing::info!(
                target: "webhook_dispatch",
                webhook_id = %webhook_id,
                event_id = %event.id,
                attempt,
                "Webhook unregistered during attempt, discarding result"
            );
            return Flow::Continue;
        }

        if succeeded {
            metric_inc("webhook.delivery.success");
            tracing::info!(
                target: "webhook_dispatch",
                webhook_id = %webhook_id,
                event_id = %event.id,
                event_type = %event.event_type,
                attempt,
                duration_ms = duration.as_millis() as u64,
                "Webhook delivery succeeded"
            );
            return Flow::Continue;
        }

        metric_inc("webhook.delivery.failure");
        let reason = failure
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        let client_error_is_final =
            !ctx.retry_client_errors && matches!(failure, Some(FailureReason::ClientError(_)));
        if attempt >= max_attempts || client_error_is_final {
            metric_inc("webhook.delivery.exhausted");
            tracing::error!(
                target: "webhook_dispatch",
                webhook_id = %webhook_id,
                event_id = %event.id,
                event_type = %event.event_type,
                attempts = attempt,
                status,
                reason = %reason,
                "Webhook delivery failed permanently"
            );
            return Flow::Continue;
        }

        let delay = policy.delay_for(attempt);
        metric_inc("webhook.delivery.retry_scheduled");
        tracing::warn!(
            target: "webhook_dispatch",
            webhook_id = %webhook_id,
            event_id = %event.id,
            attempt,
            status,
            reason = %reason,
            delay_ms = delay.as_millis() as u64,
            "Webhook delivery failed, retrying"
        );

        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                tracing::info!(
                    target: "webhook_dispatch",
                    webhook_id = %webhook_id,
                    event_id = %event.id,
                    attempts = attempt,
                    "Shutdown during backoff, abandoning delivery"
                );
                return Flow::Stopped;
            }
            _ = sleep(delay) => {}
        }

        attempt += 1;
    }
}

/// The webhook's registration, if it still accepts `event`.
async fn current_config(
    ctx: &WorkerContext,
    webhook_id: &WebhookId,
    event: &WebhookEvent,
) -> Option<Arc<WebhookConfig>> {
    ctx.registry
        .get_shared(webhook_id.as_str())
        .await
        .filter(|config| config.accepts(&event.event_type))
}
