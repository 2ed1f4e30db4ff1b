//! Action coordinator: the public entry point for correlated runs.
//!
//! A run registers its expectations *before* invoking the action that
//! triggers them (the correctness requirement the whole crate exists for),
//! then joins the action's completion with every declared settlement.

use crate::exchange::ExchangeSummary;
use crate::pattern::RequestPattern;
use crate::registry::{ExchangeRegistry, ExpectationHandle, Settlement};
use crate::result::{EsperarError, EsperarResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Per-run options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Deadline for every expectation declared by the run
    pub deadline: Duration,
}

impl RunOptions {
    /// Options with an explicit deadline
    #[must_use]
    pub const fn with_deadline(deadline: Duration) -> Self {
        Self { deadline }
    }
}

/// Result of a successful run: the action's value plus the matched exchange
/// summaries in pattern-declaration order
#[derive(Debug)]
pub struct ActionOutcome<T> {
    /// The action's own result, passed through unmodified
    pub value: T,
    /// One summary per declared pattern, in declaration order
    pub exchanges: Vec<ExchangeSummary>,
}

/// Coordinates one caller-supplied action with the exchanges it declares
#[derive(Debug, Clone)]
pub struct ActionCoordinator {
    registry: Arc<ExchangeRegistry>,
}

impl ActionCoordinator {
    /// Create a coordinator over a shared registry
    #[must_use]
    pub fn new(registry: Arc<ExchangeRegistry>) -> Self {
        Self { registry }
    }

    /// The shared registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<ExchangeRegistry> {
        &self.registry
    }

    /// Register a standalone expectation, with an optional deadline override
    pub fn register_expectation(
        &self,
        pattern: RequestPattern,
        deadline: Option<Duration>,
    ) -> EsperarResult<ExpectationHandle> {
        match deadline {
            Some(deadline) => self.registry.register_with_deadline(pattern, deadline),
            None => self.registry.register(pattern),
        }
    }

    /// Cancel a still-pending expectation
    pub fn cancel(&self, handle: &ExpectationHandle) -> bool {
        self.registry.cancel(handle.id())
    }

    /// Run an action with declared exchange patterns under the session
    /// default deadline
    pub async fn run<T, E, F, Fut>(
        &self,
        action: F,
        patterns: Vec<RequestPattern>,
    ) -> EsperarResult<ActionOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let options = RunOptions::with_deadline(self.registry.default_deadline());
        self.run_with_options(action, patterns, options).await
    }

    /// Run an action with declared exchange patterns.
    ///
    /// 1. Every pattern is registered before the action executes; an invalid
    ///    pattern aborts the run (earlier registrations are cancelled).
    /// 2. The action runs. On failure its expectations are cancelled and the
    ///    error surfaces as `ActionFailed`.
    /// 3. Every settlement is awaited, bounded by its expectation's absolute
    ///    deadline. A timeout sweep runs before any timeout is reported.
    ///
    /// Succeeds only when the action completed and every expectation matched
    /// within the deadline. Zero patterns degenerates to awaiting the action.
    pub async fn run_with_options<T, E, F, Fut>(
        &self,
        action: F,
        patterns: Vec<RequestPattern>,
        options: RunOptions,
    ) -> EsperarResult<ActionOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut handles: Vec<ExpectationHandle> = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            match self.registry.register_with_deadline(pattern, options.deadline) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.abandon(&handles);
                    return Err(err);
                }
            }
        }

        // Expectations are in place; now trigger the side effect. Exchanges
        // observed while the action executes settle through the registry and
        // are collected below.
        let value = match action().await {
            Ok(value) => value,
            Err(err) => {
                self.abandon(&handles);
                return Err(EsperarError::ActionFailed {
                    message: err.to_string(),
                });
            }
        };

        let mut exchanges = Vec::with_capacity(handles.len());
        let mut unmatched = Vec::new();
        for mut handle in handles {
            match tokio::time::timeout_at(handle.expires_at(), handle.settled()).await {
                Ok(Ok(Settlement::Matched(summary))) => {
                    exchanges.push(summary);
                }
                Ok(Ok(Settlement::TimedOut | Settlement::Cancelled)) => {
                    unmatched.push(handle.pattern().to_string());
                }
                Ok(Err(err)) => return Err(err),
                Err(_elapsed) => {
                    // The deadline passed without a settlement; the sweep is
                    // the mechanism that makes the timeout official and stops
                    // the stale entry from matching later exchanges.
                    self.registry.timeout_sweep(Instant::now());
                    unmatched.push(handle.pattern().to_string());
                }
            }
            self.registry.release(handle.id());
        }

        if unmatched.is_empty() {
            Ok(ActionOutcome { value, exchanges })
        } else {
            Err(EsperarError::ExchangeTimeout {
                unmatched,
                deadline_ms: options.deadline.as_millis() as u64,
            })
        }
    }

    /// Cancel and release every expectation of an aborted run
    fn abandon(&self, handles: &[ExpectationHandle]) {
        for handle in handles {
            self.registry.cancel(handle.id());
            self.registry.release(handle.id());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::pattern::HttpMethod;
    use crate::registry::ExpectationState;
    use crate::Exchange;

    #[tokio::test]
    async fn test_register_expectation_passthrough() {
        let registry = Arc::new(ExchangeRegistry::new());
        let coordinator = ActionCoordinator::new(Arc::clone(&registry));

        let handle = coordinator
            .register_expectation(
                RequestPattern::get("/api/v1/tags/name/*"),
                Some(Duration::from_secs(5)),
            )
            .unwrap();
        assert_eq!(registry.pending_count(), 1);

        assert!(coordinator.cancel(&handle));
        assert_eq!(
            registry.expectation_state(handle.id()),
            Some(ExpectationState::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_zero_patterns_passes_result_through() {
        let coordinator = ActionCoordinator::new(Arc::new(ExchangeRegistry::new()));
        let outcome = coordinator
            .run(|| async { Ok::<_, String>(42) }, Vec::new())
            .await
            .unwrap();
        assert_eq!(outcome.value, 42);
        assert!(outcome.exchanges.is_empty());
    }

    #[tokio::test]
    async fn test_zero_patterns_passes_error_through() {
        let coordinator = ActionCoordinator::new(Arc::new(ExchangeRegistry::new()));
        let result = coordinator
            .run(
                || async { Err::<(), _>("dialog never opened".to_string()) },
                Vec::new(),
            )
            .await;
        match result {
            Err(EsperarError::ActionFailed { message }) => {
                assert_eq!(message, "dialog never opened");
            }
            other => panic!("expected ActionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_settled_before_action_returns() {
        // The exchange is dispatched while the action is still running; the
        // settlement is buffered and collected after the action completes.
        let registry = Arc::new(ExchangeRegistry::new());
        let coordinator = ActionCoordinator::new(Arc::clone(&registry));
        let dispatch_registry = Arc::clone(&registry);

        let outcome = coordinator
            .run(
                move || async move {
                    let exchange =
                        Exchange::new(HttpMethod::Get, "https://host/api/v1/tags/name/PII", 200);
                    dispatch_registry.dispatch(&exchange).map(|_| ())
                },
                vec![RequestPattern::get("/api/v1/tags/name/*")],
            )
            .await
            .unwrap();
        assert_eq!(outcome.exchanges.len(), 1);
        assert_eq!(outcome.exchanges[0].url, "https://host/api/v1/tags/name/PII");
    }
}
