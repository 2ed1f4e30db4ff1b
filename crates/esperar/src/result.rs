//! Result and error types for Esperar.

use thiserror::Error;

/// Result type for Esperar operations
pub type EsperarResult<T> = Result<T, EsperarError>;

/// Errors that can occur in Esperar
#[derive(Debug, Error)]
pub enum EsperarError {
    /// Malformed expectation input; nothing was registered
    #[error("Invalid pattern: {message}")]
    InvalidPattern {
        /// What was wrong with the pattern
        message: String,
    },

    /// The triggering action itself failed; its expectations were cancelled
    #[error("Action failed: {message}")]
    ActionFailed {
        /// Error text surfaced by the action
        message: String,
    },

    /// One or more declared exchanges never matched within the deadline
    #[error("No exchange matched within {deadline_ms}ms for: {}", unmatched.join(", "))]
    ExchangeTimeout {
        /// Patterns that never matched, in declaration order
        unmatched: Vec<String>,
        /// Deadline that elapsed, in milliseconds
        deadline_ms: u64,
    },

    /// An expectation was observed transitioning out of a terminal state
    #[error("Registry invariant violated: {message}")]
    RegistryInvariantViolation {
        /// Description of the violated invariant
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
