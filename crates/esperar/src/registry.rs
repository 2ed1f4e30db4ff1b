//! Exchange registry: the per-session table of pending expectations.
//!
//! Every declared wait becomes an [`Expectation`] entry here. The registry
//! serializes `register`/`dispatch`/`cancel` in arrival order behind one lock,
//! matches observed exchanges against pending entries oldest-first, and
//! delivers settlements to the owning run through a oneshot channel.

use crate::exchange::{Exchange, ExchangeSummary};
use crate::pattern::RequestPattern;
use crate::result::{EsperarError, EsperarResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Default deadline for an expectation (30 seconds)
pub const DEFAULT_DEADLINE_MS: u64 = 30_000;

/// Opaque identifier for an expectation, unique within the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpectationId(Uuid);

impl ExpectationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ExpectationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an expectation. Transitions exactly once out of
/// `Pending`; no expectation re-enters `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectationState {
    /// Waiting for a matching exchange
    Pending,
    /// A matching exchange arrived
    Matched,
    /// The deadline elapsed before any exchange matched
    TimedOut,
    /// The owning run cancelled the wait
    Cancelled,
}

/// The transition of an expectation out of `Pending`, as delivered to the
/// owning run
#[derive(Debug, Clone)]
pub enum Settlement {
    /// Matched, carrying the exchange's summary
    Matched(ExchangeSummary),
    /// Timed out before any match
    TimedOut,
    /// Cancelled by the owning run
    Cancelled,
}

/// Caller-side handle for one registered expectation
#[derive(Debug)]
pub struct ExpectationHandle {
    id: ExpectationId,
    pattern: String,
    expires_at: Instant,
    rx: oneshot::Receiver<Settlement>,
}

impl ExpectationHandle {
    /// The expectation's identifier
    #[must_use]
    pub const fn id(&self) -> ExpectationId {
        self.id
    }

    /// Description of the declared pattern, for diagnostics
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Absolute deadline of this expectation
    #[must_use]
    pub const fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Await the settlement of this expectation
    pub async fn settled(&mut self) -> EsperarResult<Settlement> {
        (&mut self.rx)
            .await
            .map_err(|_| EsperarError::RegistryInvariantViolation {
                message: format!("expectation {} released without settlement", self.id),
            })
    }
}

/// One registered expectation
#[derive(Debug)]
struct Entry {
    pattern: RequestPattern,
    state: ExpectationState,
    created_at: Instant,
    deadline: Duration,
    tx: Option<oneshot::Sender<Settlement>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// All expectations of the session, keyed by id
    entries: HashMap<ExpectationId, Entry>,
    /// Still-pending expectations in registration order
    pending: Vec<ExpectationId>,
}

/// Process-wide (per test-session) table of pending expectations
#[derive(Debug)]
pub struct ExchangeRegistry {
    inner: Mutex<RegistryInner>,
    default_deadline: Duration,
}

impl Default for ExchangeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeRegistry {
    /// Create a registry with the default deadline
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_deadline(Duration::from_millis(DEFAULT_DEADLINE_MS))
    }

    /// Create a registry with a session-wide default deadline
    #[must_use]
    pub fn with_default_deadline(deadline: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            default_deadline: deadline,
        }
    }

    /// The session-wide default deadline
    #[must_use]
    pub const fn default_deadline(&self) -> Duration {
        self.default_deadline
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // State mutations never panic mid-update, so a poisoned lock is safe
        // to re-enter.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending expectation with the session default deadline
    pub fn register(&self, pattern: RequestPattern) -> EsperarResult<ExpectationHandle> {
        self.register_with_deadline(pattern, self.default_deadline)
    }

    /// Register a pending expectation with an explicit deadline. A malformed
    /// pattern fails fast with `InvalidPattern`; no state is mutated.
    pub fn register_with_deadline(
        &self,
        pattern: RequestPattern,
        deadline: Duration,
    ) -> EsperarResult<ExpectationHandle> {
        pattern.validate()?;
        let id = ExpectationId::new();
        let (tx, rx) = oneshot::channel();
        let created_at = Instant::now();
        let description = pattern.to_string();
        {
            let mut inner = self.lock();
            inner.entries.insert(
                id,
                Entry {
                    pattern,
                    state: ExpectationState::Pending,
                    created_at,
                    deadline,
                    tx: Some(tx),
                },
            );
            inner.pending.push(id);
        }
        tracing::debug!(%id, pattern = %description, deadline_ms = deadline.as_millis() as u64, "expectation registered");
        Ok(ExpectationHandle {
            id,
            pattern: description,
            expires_at: created_at + deadline,
            rx,
        })
    }

    /// Dispatch an observed exchange to the pending expectations.
    ///
    /// Pending expectations are evaluated in registration order; the first
    /// match settles as `Matched` and is removed from the pending list. An
    /// exchange satisfies at most one expectation, so further expectations
    /// with the same pattern stay `Pending` until another exchange arrives.
    /// A non-matching exchange leaves the registry unchanged.
    pub fn dispatch(&self, exchange: &Exchange) -> EsperarResult<Option<ExpectationId>> {
        let mut inner = self.lock();
        let position = inner
            .pending
            .iter()
            .position(|id| {
                inner
                    .entries
                    .get(id)
                    .is_some_and(|entry| entry.pattern.matches(exchange))
            });
        let Some(position) = position else {
            tracing::trace!(method = %exchange.method, url = %exchange.url, "exchange matched no pending expectation");
            return Ok(None);
        };
        let id = inner.pending.remove(position);
        let entry =
            inner
                .entries
                .get_mut(&id)
                .ok_or_else(|| EsperarError::RegistryInvariantViolation {
                    message: format!("pending expectation {id} missing from table"),
                })?;
        Self::settle(id, entry, ExpectationState::Matched, Settlement::Matched(exchange.summary()))?;
        tracing::debug!(%id, url = %exchange.url, status = exchange.status, "expectation matched");
        Ok(Some(id))
    }

    /// Cancel a pending expectation. Returns `true` when the expectation was
    /// pending and is now `Cancelled`; settled expectations are untouched.
    pub fn cancel(&self, id: ExpectationId) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return false;
        };
        if entry.state != ExpectationState::Pending {
            return false;
        }
        entry.state = ExpectationState::Cancelled;
        if let Some(tx) = entry.tx.take() {
            let _ = tx.send(Settlement::Cancelled);
        }
        inner.pending.retain(|pending| *pending != id);
        tracing::debug!(%id, "expectation cancelled");
        true
    }

    /// Transition every pending expectation whose age has reached its
    /// deadline to `TimedOut`, returning the affected pattern descriptions.
    /// This is the only mechanism that produces `TimedOut`.
    pub fn timeout_sweep(&self, now: Instant) -> Vec<String> {
        let mut inner = self.lock();
        let expired: Vec<ExpectationId> = inner
            .pending
            .iter()
            .copied()
            .filter(|id| {
                inner.entries.get(id).is_some_and(|entry| {
                    now.duration_since(entry.created_at) >= entry.deadline
                })
            })
            .collect();
        let mut timed_out = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.state = ExpectationState::TimedOut;
                if let Some(tx) = entry.tx.take() {
                    let _ = tx.send(Settlement::TimedOut);
                }
                timed_out.push(entry.pattern.to_string());
                tracing::warn!(%id, pattern = %entry.pattern, "expectation timed out");
            }
            inner.pending.retain(|pending| *pending != id);
        }
        timed_out
    }

    /// Drop a settled expectation from the table. Returns `false` while the
    /// expectation is still pending (cancel it first) or already released.
    pub fn release(&self, id: ExpectationId) -> bool {
        let mut inner = self.lock();
        match inner.entries.get(&id) {
            Some(entry) if entry.state != ExpectationState::Pending => {
                inner.entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Current state of an expectation, if it is still held by the registry
    #[must_use]
    pub fn expectation_state(&self, id: ExpectationId) -> Option<ExpectationState> {
        self.lock().entries.get(&id).map(|entry| entry.state)
    }

    /// Number of still-pending expectations
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn settle(
        id: ExpectationId,
        entry: &mut Entry,
        next: ExpectationState,
        settlement: Settlement,
    ) -> EsperarResult<()> {
        if entry.state != ExpectationState::Pending {
            return Err(EsperarError::RegistryInvariantViolation {
                message: format!(
                    "expectation {id} already {:?}, refusing transition to {next:?}",
                    entry.state
                ),
            });
        }
        entry.state = next;
        if let Some(tx) = entry.tx.take() {
            // The owning run may have been abandoned; a dead receiver is fine.
            let _ = tx.send(settlement);
        }
        Ok(())
    }
}
