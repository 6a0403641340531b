//! Event handlers.
//!
//! A handler is invoked with the dispatcher and a matching event. Handlers are
//! shared (`Arc<dyn EventHandler>`) and registered by identity: the same `Arc`
//! registered twice against equal filters is a duplicate, two different `Arc`s
//! wrapping equal values are not.
//!
//! # Threading
//!
//! No lock is held around handler execution. A handler reachable from several
//! filters, or from both synchronous and deferred paths, may run concurrently
//! on several threads and must tolerate it.
//!
//! # Re-entrancy
//!
//! Synchronous dispatch runs on the producer's thread. A handler invoked
//! synchronously must not block that thread on anything that needs the same
//! thread to make progress (for example, synchronously reading back from the
//! cache stage that produced the event). Wrap such handlers in
//! [`AsyncHandler`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use tracing::error;

use crate::core::SharedEvent;
use crate::dispatch::{extract_panic_message, EventDispatcher};
use crate::error::EventsError;
use crate::filter::FilterKey;

/// Shared handler reference as stored by the registry.
pub type HandlerRef = Arc<dyn EventHandler>;

/// Code invoked with a matching event.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle an event.
    ///
    /// An error returned during synchronous dispatch aborts delivery to the
    /// handlers not yet invoked for that call and is returned to the producer.
    fn process(&self, dispatcher: &EventDispatcher, event: &SharedEvent) -> Result<()>;

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Lifecycle hooks, for handlers that want to know when they are
    /// (un)registered.
    fn lifecycle(&self) -> Option<&dyn HandlerLifecycle> {
        None
    }
}

/// Registration callbacks for lifecycle-aware handlers.
///
/// Hooks run outside every registry lock, so they may register or unregister
/// handlers themselves.
pub trait HandlerLifecycle: Send + Sync {
    /// Called before the handler becomes visible to dispatch.
    fn before_registered(&self, _dispatcher: &EventDispatcher, _filter: &FilterKey) {}

    /// Called once the handler is visible to dispatch.
    fn after_registered(&self, _dispatcher: &EventDispatcher, _filter: &FilterKey) {}

    /// Called after the handler was removed.
    fn after_unregistered(&self, _dispatcher: &EventDispatcher, _filter: &FilterKey) {}
}

/// Returns true if both references point at the same handler instance.
pub(crate) fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// =============================================================================
// Closure Handlers
// =============================================================================

/// A handler backed by a closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&EventDispatcher, &SharedEvent) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventDispatcher, &SharedEvent) -> Result<()> + Send + Sync + 'static,
{
    fn process(&self, dispatcher: &EventDispatcher, event: &SharedEvent) -> Result<()> {
        (self.f)(dispatcher, event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build a shared handler from a closure.
///
/// ```ignore
/// let handler = handler_fn("log-lost", |_, event| {
///     tracing::warn!(event = event.event_name(), "partitions lost");
///     Ok(())
/// });
/// dispatcher.register(EventTypeFilter::<PartitionLostEvent>::new(), handler);
/// ```
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> HandlerRef
where
    F: Fn(&EventDispatcher, &SharedEvent) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler::new(name, f))
}

// =============================================================================
// Asynchronous Wrapping
// =============================================================================

/// Runs the wrapped handler on the dispatcher's executor instead of inline.
///
/// During synchronous dispatch `process` only submits a task and returns, so
/// the producer does not wait for this handler. Errors and panics inside the
/// task are logged and dropped. If no executor is available, `process` fails
/// with [`EventsError::NoExecutor`].
///
/// Lifecycle hooks of the wrapped handler still fire.
pub struct AsyncHandler {
    inner: HandlerRef,
    name: String,
}

impl AsyncHandler {
    pub fn new(inner: HandlerRef) -> Self {
        let name = format!("async({})", inner.name());
        Self { inner, name }
    }

    /// Wrap and share in one step.
    pub fn wrap(inner: HandlerRef) -> HandlerRef {
        Arc::new(Self::new(inner))
    }

    /// The wrapped handler.
    pub fn inner(&self) -> &HandlerRef {
        &self.inner
    }
}

impl EventHandler for AsyncHandler {
    fn process(&self, dispatcher: &EventDispatcher, event: &SharedEvent) -> Result<()> {
        let executor = dispatcher.executor().ok_or(EventsError::NoExecutor {
            operation: "async handler",
        })?;

        let inner = self.inner.clone();
        let dispatcher = dispatcher.clone();
        let event = event.clone();

        executor.submit(Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| inner.process(&dispatcher, &event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        handler = inner.name(),
                        event = event.event_name(),
                        error = ?e,
                        "async handler failed"
                    );
                }
                Err(panic) => {
                    error!(
                        handler = inner.name(),
                        event = event.event_name(),
                        panic = %extract_panic_message(&panic),
                        "async handler panicked"
                    );
                }
            }
        }))?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Option<&dyn HandlerLifecycle> {
        self.inner.lifecycle()
    }
}
