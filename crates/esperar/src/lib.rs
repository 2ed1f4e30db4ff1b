//! Esperar: Deterministic Action/Response Correlation
//!
//! Esperar (Spanish: "to wait/expect") lets a browser-driving test declare
//! "this action will cause this network exchange" and get back a single
//! awaitable that completes only when both the action and the matching
//! exchange have completed. Registering the expectation *before* the action
//! is what rules out the assert-before-the-round-trip race that makes UI
//! tests flaky.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     ESPERAR Architecture                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   run(action, patterns)   ┌───────────────────┐   │
//! │  │  Caller  │──────────────────────────►│ Action            │   │
//! │  │ (test)   │                           │ Coordinator       │   │
//! │  └──────────┘                           └────────┬──────────┘   │
//! │                                          register │ settle       │
//! │  ┌──────────┐   Exchange stream   ┌──────────────▼──────────┐   │
//! │  │ Browser/ │────────────────────►│ Network    │  Exchange  │   │
//! │  │ driver   │                     │ Observer ──► Registry   │   │
//! │  └──────────┘                     └─────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use esperar::{Exchange, HttpMethod, RequestPattern, Session};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> esperar::EsperarResult<()> {
//! let session = Session::new();
//! let (feed, _observer) = session.feed();
//!
//! let outcome = session
//!     .coordinator()
//!     .run(
//!         move || async move {
//!             // A real caller clicks/navigates here; the driver reports the
//!             // resulting exchange through the feed.
//!             feed.send(Exchange::new(
//!                 HttpMethod::Get,
//!                 "https://sandbox.example.com/api/v1/tags/name/PII",
//!                 200,
//!             ))
//!             .await
//!             .map_err(|e| e.to_string())
//!         },
//!         vec![RequestPattern::get("/api/v1/tags/name/*")],
//!     )
//!     .await?;
//!
//! assert_eq!(outcome.exchanges[0].status, 200);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod coordinator;
mod exchange;
mod observer;
mod pattern;
mod registry;
mod result;
mod session;

pub use coordinator::{ActionCoordinator, ActionOutcome, RunOptions};
pub use exchange::{Exchange, ExchangeSummary};
pub use observer::{ExchangeSource, NetworkObserver, ObserverHandle, StreamSource};
pub use pattern::{has_query_pair, BodyPredicate, HttpMethod, RequestPattern, UrlPattern};
pub use registry::{
    ExchangeRegistry, ExpectationHandle, ExpectationId, ExpectationState, Settlement,
    DEFAULT_DEADLINE_MS,
};
pub use result::{EsperarError, EsperarResult};
pub use session::Session;
