//! Per-test-session wiring of registry, observer, and coordinator.

use crate::coordinator::ActionCoordinator;
use crate::exchange::Exchange;
use crate::observer::{NetworkObserver, ObserverHandle};
use crate::registry::ExchangeRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the channel handed out by [`Session::feed`]
const FEED_CAPACITY: usize = 64;

/// One test session: a shared registry plus the coordinators and observers
/// built over it. The automation/session handle is explicit context here, not
/// ambient state.
#[derive(Debug, Clone)]
pub struct Session {
    registry: Arc<ExchangeRegistry>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session with the default expectation deadline
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ExchangeRegistry::new()),
        }
    }

    /// Create a session with a session-wide default deadline
    #[must_use]
    pub fn with_default_deadline(deadline: Duration) -> Self {
        Self {
            registry: Arc::new(ExchangeRegistry::with_default_deadline(deadline)),
        }
    }

    /// The session's shared registry
    #[must_use]
    pub fn registry(&self) -> Arc<ExchangeRegistry> {
        Arc::clone(&self.registry)
    }

    /// A coordinator over this session's registry
    #[must_use]
    pub fn coordinator(&self) -> ActionCoordinator {
        ActionCoordinator::new(Arc::clone(&self.registry))
    }

    /// An observer over this session's registry
    #[must_use]
    pub fn observer(&self) -> NetworkObserver {
        NetworkObserver::new(Arc::clone(&self.registry))
    }

    /// Open an observation channel: the returned sender is the seam where the
    /// automation layer pushes completed exchanges, and the spawned observer
    /// dispatches them in arrival order.
    #[must_use]
    pub fn feed(&self) -> (mpsc::Sender<Exchange>, ObserverHandle) {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        (tx, self.observer().spawn(rx))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::pattern::{HttpMethod, RequestPattern};

    #[test]
    fn test_default_deadline() {
        let session = Session::new();
        assert_eq!(
            session.registry().default_deadline(),
            Duration::from_millis(crate::registry::DEFAULT_DEADLINE_MS)
        );

        let session = Session::with_default_deadline(Duration::from_secs(2));
        assert_eq!(
            session.registry().default_deadline(),
            Duration::from_secs(2)
        );
    }

    #[tokio::test]
    async fn test_feed_reaches_registry() {
        let session = Session::new();
        let handle = session
            .registry()
            .register(RequestPattern::get("/api/v1/tags/name/*"))
            .unwrap();

        let (feed, observer) = session.feed();
        feed.send(Exchange::new(
            HttpMethod::Get,
            "https://host/api/v1/tags/name/PII",
            200,
        ))
        .await
        .unwrap();
        drop(feed);
        assert_eq!(observer.finish().await, 1);

        assert_eq!(
            session.registry().expectation_state(handle.id()),
            Some(crate::registry::ExpectationState::Matched)
        );
    }
}
