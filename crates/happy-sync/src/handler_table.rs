//! Shared RPC handler table: namespaced method name -> async closure.
//!
//! Both sync clients re-announce every registered handler on reconnect
//! (§4.3, §4.4), so the table itself (not just the registration calls)
//! needs to survive a reconnect.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

type HandlerFuture = Pin<Box<dyn Future<Output = serde_json::Value> + Send>>;
type HandlerFn = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// A namespaced table of RPC method handlers, shared between the run
/// loop (dispatch) and the public API (registration).
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<RwLock<HashMap<String, HandlerFn>>>,
}

impl HandlerTable {
    /// Register (or replace) the handler for `method`.
    pub async fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = serde_json::Value> + Send + 'static,
    {
        let boxed: HandlerFn = Arc::new(move |params| Box::pin(handler(params)));
        self.handlers.write().await.insert(method.into(), boxed);
    }

    /// Invoke the handler for `method`, if any is registered.
    pub async fn dispatch(&self, method: &str, params: serde_json::Value) -> Option<serde_json::Value> {
        let handler = self.handlers.read().await.get(method).cloned()?;
        Some(handler(params).await)
    }

    /// Every currently-registered method name, for re-announcement after
    /// a reconnect.
    pub async fn registered_methods(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_runs_registered_handler() {
        let table = HandlerTable::default();
        table
            .register("ns:echo", |params| async move { params })
            .await;
        let result = table.dispatch("ns:echo", serde_json::json!({"a": 1})).await;
        assert_eq!(result, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn dispatch_returns_none_for_unknown_method() {
        let table = HandlerTable::default();
        assert!(table.dispatch("ns:missing", serde_json::json!(null)).await.is_none());
    }

    #[tokio::test]
    async fn registered_methods_lists_everything_for_reannouncement() {
        let table = HandlerTable::default();
        table.register("a", |_| async { serde_json::json!(null) }).await;
        table.register("b", |_| async { serde_json::json!(null) }).await;
        let mut methods = table.registered_methods().await;
        methods.sort();
        assert_eq!(methods, vec!["a".to_string(), "b".to_string()]);
    }
}
