//! Executor registry and the cancellation token handed to executors

use async_trait::async_trait;
use conductor_types::{RunContext, StageResult};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation signal passed into every stage invocation
///
/// Executors doing long work should poll [`CancelToken::is_cancelled`]
/// or select on [`CancelToken::cancelled`]. The scheduler enforces a
/// grace period regardless, so an executor that ignores the token only
/// delays the run's cancellation, it cannot prevent it.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self {
            rx,
            _keepalive: None,
        }
    }

    /// A token that never fires, for executors driven outside a run
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// An agent bound to stages by registry key
///
/// Implementations report failure in-band through the returned
/// [`StageResult`]; the scheduler owns retry, timeout and escalation
/// policy.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn invoke(&self, input: Value, context: &RunContext, cancel: CancelToken) -> StageResult;
}

/// Maps executor keys from stage definitions to implementations
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<String, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(key.into(), executor);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(key).map(|e| Arc::clone(&e))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.executors.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoExecutor;

    #[async_trait]
    impl StageExecutor for EchoExecutor {
        async fn invoke(
            &self,
            input: Value,
            _context: &RunContext,
            _cancel: CancelToken,
        ) -> StageResult {
            StageResult::success(input)
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(EchoExecutor));
        assert!(registry.contains("echo"));
        assert!(!registry.contains("ghost"));

        let executor = registry.get("echo").unwrap();
        let result = executor
            .invoke(
                json!({"x": 1}),
                &RunContext::new(Value::Null),
                CancelToken::never(),
            )
            .await;
        assert!(result.is_success());
        assert_eq!(result.output, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_cancel_token_observes_signal() {
        let (tx, rx) = watch::channel(false);
        let mut token = CancelToken::new(rx);
        assert!(!token.is_cancelled());
        tx.send(true).unwrap();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}
