use std::error::Error as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};

use crate::error::{ConfigError, FailureReason};
use crate::signing::sign_payload;
use crate::types::{DeliveryAttempt, EventId, WebhookConfig, WebhookId};

/// Process-wide suffix for delivery attempt IDs.
static ATTEMPT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Performs exactly one HTTP delivery attempt and classifies the result.
///
/// Never retries; the caller decides whether another attempt follows.
#[derive(Debug, Clone)]
pub struct DeliveryExecutor {
    client: reqwest::Client,
    signature_header: HeaderName,
    timeout: Duration,
    snippet_limit: usize,
}

impl DeliveryExecutor {
    pub fn new(
        timeout: Duration,
        user_agent: &str,
        signature_header: &str,
        snippet_limit: usize,
    ) -> Result<Self, ConfigError> {
        let signature_header = HeaderName::from_bytes(signature_header.as_bytes())
            .map_err(|e| ConfigError::InvalidHeader(format!("{signature_header:?}: {e}")))?;

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            signature_header,
            timeout,
            snippet_limit,
        })
    }

    /// Header the signature is written to.
    pub fn signature_header(&self) -> &HeaderName {
        &self.signature_header
    }

    /// POST `payload` to `config.url` and record what happened.
    pub async fn attempt(
        &self,
        webhook_id: &WebhookId,
        config: &WebhookConfig,
        event_id: &EventId,
        payload: &[u8],
        attempt: u32,
    ) -> DeliveryAttempt {
        let sequence = ATTEMPT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let mut record = DeliveryAttempt {
            id: format!("{event_id}-{sequence}"),
            webhook_id: webhook_id.clone(),
            event_id: event_id.clone(),
            url: config.url.clone(),
            payload: payload.to_vec(),
            status_code: 0,
            response: String::new(),
            attempt,
            succeeded: false,
            error: None,
            failure: None,
            timestamp: Utc::now(),
            duration: Duration::ZERO,
        };

        let started = Instant::now();
        let result = self
            .client
            .post(&config.url)
            .timeout(self.timeout)
            .headers(self.build_headers(webhook_id, config, payload))
            .body(payload.to_vec())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                record.status_code = status.as_u16();
                record.succeeded = status.is_success();
                if !record.succeeded {
                    record.failure = Some(FailureReason::from_status(record.status_code));
                }
                record.response = read_snippet(response, self.snippet_limit).await;
            }
            Err(err) => {
                record.failure = Some(classify_transport_error(&err));
                record.error = Some(error_chain(&err));
            }
        }
        record.duration = started.elapsed();

        tracing::debug!(
            target: "webhook_dispatch",
            webhook_id = %webhook_id,
            event_id = %event_id,
            attempt,
            status = record.status_code,
            succeeded = record.succeeded,
            duration_ms = record.duration.as_millis() as u64,
            "Delivery attempt finished"
        );

        record
    }

    fn build_headers(&self, webhook_id: &WebhookId, config: &WebhookConfig, payload: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &config.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => {
                    tracing::warn!(
                        target: "webhook_dispatch",
                        webhook_id = %webhook_id,
                        header = %name,
                        "Skipping invalid static header"
                    );
                }
            }
        }

        if let Some(secret) = config.signing_secret() {
            // Hex digest plus ASCII prefix is always a valid header value.
            if let Ok(value) = HeaderValue::from_str(&sign_payload(payload, secret)) {
                headers.insert(self.signature_header.clone(), value);
            }
        }

        headers
    }
}

fn classify_transport_error(err: &reqwest::Error) -> FailureReason {
    if err.is_timeout() {
        FailureReason::Timeout
    } else if err.is_connect() {
        FailureReason::Connect
    } else {
        FailureReason::Network
    }
}

/// `err` and its sources joined with `": "`.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Read at most `limit` bytes of the body without buffering the rest.
async fn read_snippet(mut response: reqwest::Response, limit: usize) -> String {
    let mut buf = Vec::with_capacity(limit.min(4096));
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = (limit - buf.len()).min(chunk.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
