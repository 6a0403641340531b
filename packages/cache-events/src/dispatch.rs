//! Event dispatcher for routing events to registered handlers.
//!
//! The `EventDispatcher` is responsible for:
//! 1. Keeping the filter → handler registry
//! 2. Broadcasting events to the handlers whose filter matches
//! 3. Handing deferred work to the task executor
//!
//! # Delivery Disciplines
//!
//! | Method                                    | Runs on          | Errors                    |
//! |-------------------------------------------|------------------|---------------------------|
//! | [`dispatch`](EventDispatcher::dispatch)   | caller's thread  | returned, stops delivery  |
//! | [`dispatch_to`](EventDispatcher::dispatch_to) | caller's thread | returned, stops delivery |
//! | [`dispatch_later`](EventDispatcher::dispatch_later) | executor thread | logged              |
//! | [`AsyncHandler`](crate::AsyncHandler)     | executor thread  | logged                    |
//!
//! # Ordering
//!
//! Handlers registered against one filter run in registration order. The
//! order in which different matching filters are visited is unspecified.
//! Deferred and asynchronous deliveries are not ordered relative to anything.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::config::DispatcherConfig;
use crate::core::{Event, SharedEvent};
use crate::error::EventsError;
use crate::executor::TaskExecutor;
use crate::filter::FilterKey;
use crate::handler::{EventHandler, HandlerRef};
use crate::registry::{Registration, SubscriberRegistry};
use crate::resource::ResourceRegistry;

struct Inner {
    registry: SubscriberRegistry,
    executor: Option<Arc<dyn TaskExecutor>>,
    // Weak: the resource registry usually holds this dispatcher.
    resources: Option<Weak<ResourceRegistry>>,
    config: DispatcherConfig,
}

/// Filter-indexed event dispatcher.
///
/// Cloning is cheap and every clone shares the same registry.
///
/// # Re-entrancy
///
/// Synchronous dispatch runs handlers inline on the producer's thread. A
/// handler invoked that way must not block on anything that needs the
/// producer's thread to make further progress, such as synchronously requesting
/// data from the pipeline stage that produced the event. Such handlers belong
/// in an [`AsyncHandler`](crate::AsyncHandler). Handlers may freely register,
/// unregister or dispatch from inside `process` and from lifecycle hooks; no
/// dispatcher lock is held while they run.
///
/// # Example
///
/// ```ignore
/// let dispatcher = EventDispatcher::builder()
///     .with_executor(Arc::new(TokioExecutor::current().unwrap()))
///     .build();
///
/// dispatcher.register(CacheNameFilter::new("dist-*"), Arc::new(AuditHandler::new()));
/// dispatcher.emit(EntryInsertedEvent::new("dist-orders", Entry::new(1, "a")))?;
/// ```
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl EventDispatcher {
    /// Create a dispatcher with default configuration and no executor.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EventDispatcherBuilder {
        EventDispatcherBuilder::default()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register `handler` against `filter`.
    ///
    /// Returns `false`, with no other effect, if this handler instance is
    /// already registered against an equal filter. Otherwise the handler's
    /// `before_registered` hook runs, the pair becomes visible to dispatch,
    /// `after_registered` runs, and `true` is returned.
    pub fn register(&self, filter: impl Into<FilterKey>, handler: HandlerRef) -> bool {
        let filter = filter.into();

        let outcome = self.inner.registry.insert(&filter, &handler, || {
            if let Some(lifecycle) = handler.lifecycle() {
                lifecycle.before_registered(self, &filter);
            }
        });

        match outcome {
            Registration::Duplicate => {
                debug!(handler = handler.name(), ?filter, "handler already registered");
                false
            }
            Registration::Inserted => {
                if let Some(lifecycle) = handler.lifecycle() {
                    lifecycle.after_registered(self, &filter);
                }
                debug!(handler = handler.name(), ?filter, "handler registered");
                true
            }
        }
    }

    /// Unregister `handler` from `filter`.
    ///
    /// Removing a pair that is not registered does nothing and returns
    /// `false`. On removal the handler's `after_unregistered` hook runs.
    pub fn unregister(&self, filter: impl Into<FilterKey>, handler: &HandlerRef) -> bool {
        let filter = filter.into();

        if !self.inner.registry.remove(&filter, handler) {
            return false;
        }

        if let Some(lifecycle) = handler.lifecycle() {
            lifecycle.after_unregistered(self, &filter);
        }
        debug!(handler = handler.name(), ?filter, "handler unregistered");
        true
    }

    /// Returns true if `handler` is registered against `filter`.
    pub fn is_registered(&self, filter: impl Into<FilterKey>, handler: &HandlerRef) -> bool {
        self.inner.registry.contains(&filter.into(), handler)
    }

    /// Unregister every handler, firing `after_unregistered` for each pair.
    /// Returns the number of pairs removed.
    pub fn clear(&self) -> usize {
        let removed = self.inner.registry.drain();
        for (filter, handler) in &removed {
            if let Some(lifecycle) = handler.lifecycle() {
                lifecycle.after_unregistered(self, filter);
            }
        }
        debug!(removed = removed.len(), "registry cleared");
        removed.len()
    }

    /// Number of distinct filters with at least one handler.
    pub fn filter_count(&self) -> usize {
        self.inner.registry.filter_count()
    }

    /// Number of registered (filter, handler) pairs.
    pub fn handler_count(&self) -> usize {
        self.inner.registry.handler_count()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Broadcast `event` to every handler whose filter matches.
    ///
    /// Handlers run synchronously on the calling thread. The first handler
    /// error is returned and the remaining handlers are skipped; handlers
    /// that already ran are not rolled back.
    pub fn dispatch(&self, event: &SharedEvent) -> Result<(), EventsError> {
        let buckets = self.inner.registry.matching(&**event);
        trace!(
            event = event.event_name(),
            matched_filters = buckets.len(),
            "dispatching event"
        );

        for bucket in &buckets {
            for handler in bucket.iter() {
                self.invoke(handler.as_ref(), event)?;
            }
        }
        Ok(())
    }

    /// Run `handler` on the calling thread, then broadcast `event`.
    ///
    /// If `handler` fails, nothing is broadcast.
    pub fn dispatch_to(&self, handler: &dyn EventHandler, event: &SharedEvent) -> Result<(), EventsError> {
        self.invoke(handler, event)?;
        self.dispatch(event)
    }

    /// Wrap `event` and broadcast it.
    pub fn emit<E: Event>(&self, event: E) -> Result<(), EventsError> {
        let event: SharedEvent = Arc::new(event);
        self.dispatch(&event)
    }

    /// Broadcast `event` later on the executor.
    ///
    /// Returns as soon as the task is submitted. Handler failures in the
    /// deferred broadcast are logged and never reach the caller.
    pub fn dispatch_later(&self, event: SharedEvent) -> Result<(), EventsError> {
        let executor = self.executor().ok_or(EventsError::NoExecutor {
            operation: "deferred dispatch",
        })?;

        let event_name = event.event_name();
        let dispatcher = self.clone();
        let submitted = executor.submit(Box::new(move || {
            match catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event = event.event_name(), error = %e, "deferred dispatch failed");
                }
                Err(panic) => {
                    error!(
                        event = event.event_name(),
                        panic = %extract_panic_message(&panic),
                        "deferred dispatch panicked"
                    );
                }
            }
        }));

        if let Err(e) = &submitted {
            warn!(event = event_name, error = %e, "executor rejected deferred dispatch");
        }
        submitted
    }

    /// The executor used for deferred and asynchronous work.
    ///
    /// An executor set on the builder wins; otherwise it is looked up in the
    /// resource registry on every call.
    pub fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        if let Some(executor) = &self.inner.executor {
            return Some(executor.clone());
        }
        self.inner
            .resources
            .as_ref()?
            .upgrade()?
            .get::<dyn TaskExecutor>()
    }

    fn invoke(&self, handler: &dyn EventHandler, event: &SharedEvent) -> Result<(), EventsError> {
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.process(self, event)));
        let elapsed = started.elapsed();

        if let Some(threshold) = self.inner.config.slow_handler_threshold {
            if elapsed > threshold {
                warn!(
                    handler = handler.name(),
                    event = event.event_name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow synchronous handler is holding up the producer"
                );
            }
        }

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(handler_error(handler, event, error)),
            Err(panic) => {
                let message = extract_panic_message(&panic);
                error!(
                    handler = handler.name(),
                    event = event.event_name(),
                    panic = %message,
                    "handler panicked"
                );
                Err(EventsError::HandlerPanicked {
                    handler: handler.name().to_string(),
                    event: event.event_name(),
                    message,
                })
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registry", &self.inner.registry)
            .field("has_executor", &self.inner.executor.is_some())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Executor problems raised inside a handler keep their own variant; anything
/// else is attributed to the handler.
fn handler_error(handler: &dyn EventHandler, event: &SharedEvent, error: anyhow::Error) -> EventsError {
    match error.downcast::<EventsError>() {
        Ok(e @ (EventsError::NoExecutor { .. } | EventsError::ExecutorRejected { .. })) => e,
        Ok(e) => EventsError::HandlerFailed {
            handler: handler.name().to_string(),
            event: event.event_name(),
            error: e.into(),
        },
        Err(error) => EventsError::HandlerFailed {
            handler: handler.name().to_string(),
            event: event.event_name(),
            error,
        },
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`EventDispatcher`].
#[derive(Default)]
pub struct EventDispatcherBuilder {
    executor: Option<Arc<dyn TaskExecutor>>,
    resources: Option<Weak<ResourceRegistry>>,
    config: DispatcherConfig,
}

impl EventDispatcherBuilder {
    /// Use this executor for deferred and asynchronous work.
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Look the executor up in `resources` when one is needed.
    ///
    /// Only a weak reference is kept.
    pub fn with_resources(mut self, resources: &Arc<ResourceRegistry>) -> Self {
        self.resources = Some(Arc::downgrade(resources));
        self
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> EventDispatcher {
        EventDispatcher {
            inner: Arc::new(Inner {
                registry: SubscriberRegistry::new(),
                executor: self.executor,
                resources: self.resources,
                config: self.config,
            }),
        }
    }
}
