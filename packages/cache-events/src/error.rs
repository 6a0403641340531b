//! Structured error types for cache-events.
//!
//! `EventsError` provides pattern-matchable errors instead of a bare
//! `anyhow::Error`. Handler bodies return `anyhow::Result<()>`; the dispatcher
//! wraps their failures in [`EventsError::HandlerFailed`] /
//! [`EventsError::HandlerPanicked`] so the caller can see which handler broke.
//!
//! # Error Taxonomy
//!
//! | Kind                 | Variant(s)                              | Path             | Policy                  |
//! |----------------------|-----------------------------------------|------------------|-------------------------|
//! | Configuration        | `NoDispatcherBound`, `NoExecutor`       | any              | raised immediately      |
//! | Handler failure      | `HandlerFailed`, `HandlerPanicked`      | synchronous      | propagated to producer  |
//! | Isolated failure     | (same variants, never returned)         | deferred / async | logged, then dropped    |
//! | Duplicate register   | none - `register` returns `false`       | any              | not an error            |
//!
//! # Example
//!
//! ```ignore
//! match translator.on_notification(&raw) {
//!     Ok(_) => {}
//!     Err(EventsError::NoDispatcherBound { context }) => {
//!         panic!("partition events for {context} have nowhere to go");
//!     }
//!     Err(e) => tracing::error!(error = %e, "partition listener failed"),
//! }
//! ```

use thiserror::Error;

/// Structured error type for dispatch operations.
#[derive(Debug, Error)]
pub enum EventsError {
    /// No dispatcher is bound to the context that owns a partitioned service.
    #[error("no event dispatcher bound for context {context}")]
    NoDispatcherBound {
        /// Name of the context that was searched.
        context: String,
    },

    /// A deferred or asynchronous operation was attempted without an executor.
    #[error("no task executor available for {operation}")]
    NoExecutor {
        /// The operation that needed the executor.
        operation: &'static str,
    },

    /// The executor refused the task.
    #[error("task executor rejected {operation}: {message}")]
    ExecutorRejected {
        /// The operation whose task was refused.
        operation: &'static str,
        /// Executor-supplied reason.
        message: String,
    },

    /// A handler returned an error.
    #[error("handler {handler} failed on {event}: {error}")]
    HandlerFailed {
        /// Handler name.
        handler: String,
        /// Name of the event being delivered.
        event: &'static str,
        /// The handler's error.
        #[source]
        error: anyhow::Error,
    },

    /// A handler panicked.
    #[error("handler {handler} panicked on {event}: {message}")]
    HandlerPanicked {
        /// Handler name.
        handler: String,
        /// Name of the event being delivered.
        event: &'static str,
        /// Panic payload rendered as text.
        message: String,
    },
}

impl EventsError {
    /// Returns true for configuration errors (never worth retrying).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EventsError::NoDispatcherBound { .. } | EventsError::NoExecutor { .. }
        )
    }

    /// Returns true if the error came from a handler rather than the dispatcher.
    pub fn is_handler_error(&self) -> bool {
        matches!(
            self,
            EventsError::HandlerFailed { .. } | EventsError::HandlerPanicked { .. }
        )
    }
}
