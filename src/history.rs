use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::{DeliveryAttempt, WebhookId};

/// Aggregate attempt counts across all webhooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryTotals {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Append-only audit trail of delivery attempts.
///
/// Every attempt is recorded as soon as it completes, successful or not.
#[async_trait]
pub trait DeliveryHistory: Send + Sync {
    async fn record(&self, attempt: DeliveryAttempt);

    /// Attempts for one webhook, in the order they were recorded.
    async fn attempts(&self, webhook_id: &str) -> Vec<DeliveryAttempt>;

    /// Drop all attempts for one webhook.
    async fn remove(&self, webhook_id: &str);

    async fn totals(&self) -> DeliveryTotals;
}

/// History kept in process memory for the lifetime of the dispatcher.
///
/// There is no eviction; attempts are released only when their webhook is
/// unregistered.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryHistory {
    attempts: RwLock<HashMap<WebhookId, Vec<DeliveryAttempt>>>,
}

impl InMemoryDeliveryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryHistory for InMemoryDeliveryHistory {
    async fn record(&self, attempt: DeliveryAttempt) {
        let mut guard = self.attempts.write().await;
        guard
            .entry(attempt.webhook_id.clone())
            .or_default()
            .push(attempt);
    }

    async fn attempts(&self, webhook_id: &str) -> Vec<DeliveryAttempt> {
        let guard = self.attempts.read().await;
        guard.get(webhook_id).cloned().unwrap_or_default()
    }

    async fn remove(&self, webhook_id: &str) {
        self.attempts.write().await.remove(webhook_id);
    }

    async fn totals(&self) -> DeliveryTotals {
        let guard = self.attempts.read().await;
        guard
            .values()
            .flatten()
            .fold(DeliveryTotals::default(), |mut totals, attempt| {
                totals.total += 1;
                if attempt.succeeded {
                    totals.succeeded += 1;
                } else {
                    totals.failed += 1;
                }
                totals
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;

    fn attempt(webhook: &str, n: u32, succeeded: bool) -> DeliveryAttempt {
        DeliveryAttempt {
            id: format!("evt-{n}"),
            webhook_id: webhook.into(),
            event_id: "evt".into(),
            url: "http://localhost/hook".to_string(),
            payload: b"{}".to_vec(),
            status_code: if succeeded { 200 } else { 500 },
            response: String::new(),
            attempt: n,
            succeeded,
            error: None,
            failure: None,
            timestamp: Utc::now(),
            duration: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn keeps_insertion_order_per_webhook() {
        let history = InMemoryDeliveryHistory::new();
        history.record(attempt("w1", 1, false)).await;
        history.record(attempt("w2", 1, true)).await;
        history.record(attempt("w1", 2, true)).await;

        let numbers: Vec<_> = history.attempts("w1").await.iter().map(|a| a.attempt).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(history.attempts("w2").await.len(), 1);
        assert!(history.attempts("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn returned_attempts_are_copies() {
        let history = InMemoryDeliveryHistory::new();
        history.record(attempt("w1", 1, true)).await;

        let mut copy = history.attempts("w1").await;
        copy[0].succeeded = false;
        copy.clear();

        let stored = history.attempts("w1").await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].succeeded);
    }

    #[tokio::test]
    async fn totals_and_remove() {
        let history = InMemoryDeliveryHistory::new();
        history.record(attempt("w1", 1, false)).await;
        history.record(attempt("w1", 2, true)).await;
        history.record(attempt("w2", 1, false)).await;

        assert_eq!(
            history.totals().await,
            DeliveryTotals { total: 3, succeeded: 1, failed: 2 }
        );

        history.remove("w1").await;
        assert!(history.attempts("w1").await.is_empty());
        assert_eq!(history.totals().await.total, 1);
    }
}
