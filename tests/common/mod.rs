//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use webhook_dispatch::{DeliveryAttempt, Dispatcher, DispatcherConfig, RetryPolicy};
use wiremock::{Request, Respond, ResponseTemplate};

pub const SECRET: &str = "s3cr3t";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Responds with `statuses[n]` on the n-th call, repeating the last one.
#[derive(Clone)]
pub struct SequenceResponder {
    statuses: Arc<Vec<u16>>,
    calls: Arc<AtomicUsize>,
}

impl SequenceResponder {
    pub fn new(statuses: &[u16]) -> Self {
        assert!(!statuses.is_empty());
        Self {
            statuses: Arc::new(statuses.to_vec()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(call)
            .or_else(|| self.statuses.last())
            .copied()
            .unwrap_or(200);
        ResponseTemplate::new(status).set_body_string(format!("call {call}"))
    }
}

/// Small, fast dispatcher settings for tests.
pub fn test_config(max_workers: usize, queue_size: usize) -> DispatcherConfig {
    DispatcherConfig {
        max_workers,
        queue_size,
        delivery_timeout: Duration::from_secs(2),
        retry_policy: fast_policy(0),
        ..Default::default()
    }
}

/// Retries with 1ms delays so tests do not wait on backoff.
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_retries,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
    )
}

/// Poll history until `expected` attempts exist or five seconds pass.
pub async fn wait_for_attempts(
    dispatcher: &Dispatcher,
    webhook_id: &str,
    expected: usize,
) -> Vec<DeliveryAttempt> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let attempts = dispatcher.get_deliveries(webhook_id).await;
        if attempts.len() >= expected || Instant::now() >= deadline {
            return attempts;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Give workers a moment to do anything they were not supposed to do.
pub async fn settle() {
    sleep(Duration::from_millis(150)).await;
}
