use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::types::{WebhookConfig, WebhookId};

/// In-memory store of webhook configuration, keyed by ID.
///
/// Configs are held behind `Arc` so workers can take a cheap snapshot and
/// release the lock before doing any network I/O.
#[derive(Debug, Default)]
pub struct WebhookRegistry {
    webhooks: RwLock<HashMap<WebhookId, Arc<WebhookConfig>>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the config stored under `id`.
    pub async fn register(&self, id: WebhookId, config: WebhookConfig) {
        let mut guard = self.webhooks.write().await;
        guard.insert(id, Arc::new(config));
    }

    /// Remove `id` and run `cleanup` before the write lock is released.
    ///
    /// Nothing passed to [`WebhookRegistry::while_registered`] for `id` can
    /// run between the removal and the end of `cleanup`. Returns whether `id`
    /// was present.
    pub async fn unregister_with<F, Fut>(&self, id: &str, cleanup: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut guard = self.webhooks.write().await;
        let existed = guard.remove(id).is_some();
        cleanup().await;
        existed
    }

    /// Run `f` while `id` is held registered.
    ///
    /// Returns `None` without calling `f` if `id` is not registered.
    pub async fn while_registered<F, Fut, T>(&self, id: &str, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.webhooks.read().await;
        if !guard.contains_key(id) {
            return None;
        }
        Some(f().await)
    }

    pub async fn get(&self, id: &str) -> Option<WebhookConfig> {
        self.get_shared(id).await.map(|config| config.as_ref().clone())
    }

    pub(crate) async fn get_shared(&self, id: &str) -> Option<Arc<WebhookConfig>> {
        let guard = self.webhooks.read().await;
        guard.get(id).cloned()
    }

    /// Owned copy of every registration.
    pub async fn list(&self) -> HashMap<WebhookId, WebhookConfig> {
        let guard = self.webhooks.read().await;
        guard
            .iter()
            .map(|(id, config)| (id.clone(), config.as_ref().clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.webhooks.read().await.len()
    }

    /// Whether any active webhook subscribes to `event_type`.
    pub async fn has_subscriber(&self, event_type: &str) -> bool {
        let guard = self.webhooks.read().await;
        guard.values().any(|config| config.accepts(event_type))
    }

    /// IDs of active webhooks subscribed to `event_type`, in order.
    pub async fn subscribers(&self, event_type: &str) -> Vec<WebhookId> {
        let mut matched: Vec<_> = {
            let guard = self.webhooks.read().await;
            guard
                .iter()
                .filter(|(_, config)| config.accepts(event_type))
                .map(|(id, _)| id.clone())
                .collect()
        };
        matched.sort();
        matched
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn hook(events: &[&str]) -> WebhookConfig {
        WebhookConfig::new("http://localhost/hook").with_events(events.iter().copied())
    }

    #[tokio::test]
    async fn register_is_an_upsert() {
        let registry = WebhookRegistry::new();
        registry.register("w1".into(), hook(&["a"])).await;
        registry.register("w1".into(), hook(&["b"])).await;

        assert_eq!(registry.len().await, 1);
        let config = registry.get("w1").await.unwrap();
        assert!(config.matches("b"));
        assert!(!config.matches("a"));
    }

    #[tokio::test]
    async fn unregister_missing_is_noop() {
        let registry = WebhookRegistry::new();
        assert!(!registry.unregister_with("nope", || async {}).await);
        registry.register("w1".into(), hook(&[])).await;
        assert!(registry.unregister_with("w1", || async {}).await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn while_registered_skips_removed_ids() {
        let registry = WebhookRegistry::new();
        registry.register("w1".into(), hook(&[])).await;

        assert_eq!(registry.while_registered("w1", || async { 7 }).await, Some(7));
        assert_eq!(registry.while_registered("w2", || async { 7 }).await, None);

        let cleaned = AtomicBool::new(false);
        let flag = &cleaned;
        registry
            .unregister_with("w1", move || async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await;
        assert!(cleaned.load(Ordering::SeqCst));
        assert_eq!(registry.while_registered("w1", || async { 7 }).await, None);
    }

    #[tokio::test]
    async fn list_is_a_snapshot() {
        let registry = WebhookRegistry::new();
        registry.register("w1".into(), hook(&["a"])).await;

        let mut listed = registry.list().await;
        listed.clear();
        listed.insert("w2".into(), hook(&[]));

        assert_eq!(registry.len().await, 1);
        assert!(registry.get("w2").await.is_none());
    }

    #[tokio::test]
    async fn subscribers_are_active_matches_in_id_order() {
        let registry = WebhookRegistry::new();
        registry.register("c".into(), hook(&["file.uploaded"])).await;
        registry.register("a".into(), hook(&["*"])).await;
        registry.register("b".into(), hook(&["peer.joined"])).await;
        registry
            .register("d".into(), hook(&["file.uploaded"]).with_active(false))
            .await;

        let ids: Vec<_> = registry
            .subscribers("file.uploaded")
            .await
            .into_iter()
            .map(|id| id.0)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);

        assert!(registry.has_subscriber("peer.joined").await);
        registry.unregister_with("a", || async {}).await;
        assert!(!registry.has_subscriber("backup.completed").await);
    }
}
