//! Network observer: feeds observed exchanges into the registry.
//!
//! The observer consumes a caller-supplied subscription source yielding
//! exchanges in real arrival order (responses race, so this is not
//! request-issued order) and dispatches each to the registry. It never
//! buffers history: an expectation registered after an exchange completed
//! will not see it, so callers must register before acting.

use crate::exchange::Exchange;
use crate::registry::ExchangeRegistry;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A subscription source yielding observed exchanges in arrival order
#[async_trait]
pub trait ExchangeSource: Send {
    /// Yield the next observed exchange, or `None` when the subscription ends
    async fn next_exchange(&mut self) -> Option<Exchange>;
}

#[async_trait]
impl ExchangeSource for mpsc::Receiver<Exchange> {
    async fn next_exchange(&mut self) -> Option<Exchange> {
        self.recv().await
    }
}

#[async_trait]
impl ExchangeSource for mpsc::UnboundedReceiver<Exchange> {
    async fn next_exchange(&mut self) -> Option<Exchange> {
        self.recv().await
    }
}

/// Adapter for any [`Stream`] of exchanges (e.g. a CDP response event stream)
#[derive(Debug)]
pub struct StreamSource<S> {
    inner: S,
}

impl<S> StreamSource<S>
where
    S: Stream<Item = Exchange> + Unpin + Send,
{
    /// Wrap a stream as an exchange source
    pub fn new(stream: S) -> Self {
        Self { inner: stream }
    }
}

#[async_trait]
impl<S> ExchangeSource for StreamSource<S>
where
    S: Stream<Item = Exchange> + Unpin + Send,
{
    async fn next_exchange(&mut self) -> Option<Exchange> {
        self.inner.next().await
    }
}

/// Subscribes to a source of exchanges and dispatches each to the registry
#[derive(Debug, Clone)]
pub struct NetworkObserver {
    registry: Arc<ExchangeRegistry>,
}

impl NetworkObserver {
    /// Create an observer over a shared registry
    #[must_use]
    pub fn new(registry: Arc<ExchangeRegistry>) -> Self {
        Self { registry }
    }

    /// Dispatch exchanges from the source until it ends, returning how many
    /// settled an expectation. Stops on a registry invariant violation.
    pub async fn drive<S: ExchangeSource>(self, mut source: S) -> u64 {
        let mut matched = 0;
        while let Some(exchange) = source.next_exchange().await {
            match self.registry.dispatch(&exchange) {
                Ok(Some(id)) => {
                    matched += 1;
                    tracing::trace!(%id, url = %exchange.url, "observer settled expectation");
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(error = %err, "registry dispatch failed, observer stopping");
                    break;
                }
            }
        }
        matched
    }

    /// Run the dispatch loop on its own task
    pub fn spawn<S: ExchangeSource + 'static>(self, source: S) -> ObserverHandle {
        ObserverHandle {
            task: tokio::spawn(self.drive(source)),
        }
    }
}

/// Handle to a spawned observer task
#[derive(Debug)]
pub struct ObserverHandle {
    task: JoinHandle<u64>,
}

impl ObserverHandle {
    /// Wait for the observer to finish (its source ended), returning how many
    /// exchanges settled an expectation
    pub async fn finish(self) -> u64 {
        self.task.await.unwrap_or(0)
    }

    /// Abort the observer task
    pub fn abort(&self) {
        self.task.abort();
    }
}
