use std::time::Duration;

use tracing_subscriber::EnvFilter;
use webhook_dispatch::{Dispatcher, DispatcherConfig, RetryPolicy, WebhookConfig, WebhookEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webhook_dispatch=debug")),
        )
        .init();

    let dispatcher = Dispatcher::new(DispatcherConfig {
        max_workers: 2,
        queue_size: 100,
        delivery_timeout: Duration::from_secs(5),
        ..Default::default()
    })?;

    dispatcher
        .register_webhook(
            "uploads",
            WebhookConfig::new("https://example.com/webhook")
                .with_secret("supersecret")
                .with_events(["file.uploaded", "file.deleted"])
                .with_header("X-Tenant", "tenant_a")
                .with_retry_policy(RetryPolicy::new(
                    2,
                    Duration::from_millis(200),
                    Duration::from_secs(2),
                    2.0,
                )),
        )
        .await?;
    dispatcher.start()?;

    let outcome = dispatcher
        .publish_event(
            WebhookEvent::new("evt_123", "file.uploaded")
                .with_data("file_key", "file_123")
                .with_data("size", 4096)
                .with_source("file-store"),
        )
        .await;
    println!("publish: {outcome:?}");

    tokio::time::sleep(Duration::from_secs(3)).await;

    for attempt in dispatcher.get_deliveries("uploads").await {
        println!(
            "attempt {} -> status {} succeeded={} {:?}",
            attempt.attempt, attempt.status_code, attempt.succeeded, attempt.failure
        );
    }
    println!("{}", serde_json::to_string_pretty(&dispatcher.get_stats().await)?);

    dispatcher.stop().await;
    Ok(())
}
