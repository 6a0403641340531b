//! Service context: the owner of a dispatcher's lifecycle.
//!
//! A `ServiceContext` groups the services of one cache runtime instance. It
//! owns a [`ResourceRegistry`] through which the host supplies the task
//! executor, and it is where the dispatcher for those services is bound.
//!
//! ```text
//!   new ──► register_executor ──► create_dispatcher / bind_dispatcher ──► start
//!                                                                           │
//!   (dispatcher cleared, unbound) ◄──────────── shutdown ◄──────────────────┘
//! ```
//!
//! `start` and `shutdown` announce themselves with a [`ContextLifecycleEvent`]
//! so handlers can set up and tear down alongside the context.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DispatcherConfig;
use crate::core::Event;
use crate::dispatch::EventDispatcher;
use crate::error::EventsError;
use crate::executor::TaskExecutor;
use crate::resource::ResourceRegistry;

/// Named scope owning a resource registry and the bound dispatcher.
pub struct ServiceContext {
    name: String,
    resources: Arc<ResourceRegistry>,
}

impl ServiceContext {
    /// Create a context with an empty resource registry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Arc::new(ResourceRegistry::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Make `executor` available to dispatchers created by this context.
    pub fn register_executor(&self, executor: Arc<dyn TaskExecutor>) {
        self.resources.register::<dyn TaskExecutor>(executor);
    }

    /// Build a dispatcher that resolves its executor from this context, and
    /// bind it.
    pub fn create_dispatcher(&self, config: DispatcherConfig) -> EventDispatcher {
        let dispatcher = EventDispatcher::builder()
            .with_resources(&self.resources)
            .with_config(config)
            .build();
        self.bind_dispatcher(dispatcher.clone());
        dispatcher
    }

    /// Bind `dispatcher` to this context, returning the one it replaced.
    pub fn bind_dispatcher(&self, dispatcher: EventDispatcher) -> Option<EventDispatcher> {
        self.resources
            .register(Arc::new(dispatcher))
            .map(|previous| EventDispatcher::clone(&previous))
    }

    /// The bound dispatcher, if any.
    pub fn dispatcher(&self) -> Option<EventDispatcher> {
        self.resources
            .get::<EventDispatcher>()
            .map(|dispatcher| EventDispatcher::clone(&dispatcher))
    }

    /// The bound dispatcher, or [`EventsError::NoDispatcherBound`].
    pub fn require_dispatcher(&self) -> Result<EventDispatcher, EventsError> {
        self.dispatcher().ok_or_else(|| EventsError::NoDispatcherBound {
            context: self.name.clone(),
        })
    }

    /// Announce that the context is running.
    ///
    /// Fails if no dispatcher is bound, or if a handler of the
    /// [`ContextLifecycleEvent`] fails.
    pub fn start(&self) -> Result<(), EventsError> {
        let dispatcher = self.require_dispatcher()?;
        info!(context = %self.name, "starting service context");
        dispatcher.emit(ContextLifecycleEvent::new(&self.name, LifecycleStage::Started))
    }

    /// Tear the context down.
    ///
    /// Announces [`LifecycleStage::Stopping`], then unbinds the dispatcher
    /// and unregisters all of its handlers. Teardown happens even if a
    /// handler of the announcement fails; that failure is returned afterwards.
    /// Without a bound dispatcher this does nothing.
    pub fn shutdown(&self) -> Result<(), EventsError> {
        let Some(dispatcher) = self.dispatcher() else {
            return Ok(());
        };

        info!(context = %self.name, "stopping service context");
        let announced =
            dispatcher.emit(ContextLifecycleEvent::new(&self.name, LifecycleStage::Stopping));
        if let Err(e) = &announced {
            warn!(context = %self.name, error = %e, "stopping handler failed, tearing down anyway");
        }

        self.resources.unregister::<EventDispatcher>();
        let removed = dispatcher.clear();
        info!(context = %self.name, removed, "service context stopped");

        announced
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("name", &self.name)
            .field("resources", &self.resources)
            .finish()
    }
}

// =============================================================================
// Lifecycle Events
// =============================================================================

/// Stage of a context's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStage {
    Started,
    Stopping,
}

/// Raised by [`ServiceContext::start`] and [`ServiceContext::shutdown`].
#[derive(Debug, Clone)]
pub struct ContextLifecycleEvent {
    context_name: String,
    stage: LifecycleStage,
}

impl ContextLifecycleEvent {
    pub fn new(context_name: impl Into<String>, stage: LifecycleStage) -> Self {
        Self {
            context_name: context_name.into(),
            stage,
        }
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn stage(&self) -> LifecycleStage {
        self.stage
    }
}

impl Event for ContextLifecycleEvent {
    fn event_name(&self) -> &'static str {
        "ContextLifecycle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SharedEvent;
    use crate::filter::{EventTypeFilter, MatchAll};
    use crate::handler::{handler_fn, AsyncHandler};
    use crate::testing::{CountingHandler, Journal, LifecycleProbe, ManualExecutor};
    use crate::HandlerRef;

    #[test]
    fn test_require_dispatcher_without_binding() {
        let context = ServiceContext::new("cluster-a");
        assert!(context.dispatcher().is_none());

        match context.require_dispatcher() {
            Err(EventsError::NoDispatcherBound { context }) => assert_eq!(context, "cluster-a"),
            other => panic!("Expected NoDispatcherBound, got {other:?}"),
        }
    }

    #[test]
    fn test_bound_dispatcher_is_shared() {
        let context = ServiceContext::new("cluster-a");
        let dispatcher = context.create_dispatcher(DispatcherConfig::default());
        let handler: HandlerRef = Arc::new(CountingHandler::new());

        dispatcher.register(MatchAll, handler.clone());
        assert!(context
            .require_dispatcher()
            .unwrap()
            .is_registered(MatchAll, &handler));
    }

    #[test]
    fn test_bind_returns_previous() {
        let context = ServiceContext::new("cluster-a");
        assert!(context.bind_dispatcher(EventDispatcher::new()).is_none());
        assert!(context.bind_dispatcher(EventDispatcher::new()).is_some());
    }

    #[test]
    fn test_created_dispatcher_uses_context_executor() {
        let context = ServiceContext::new("cluster-a");
        let dispatcher = context.create_dispatcher(DispatcherConfig::default());
        assert!(dispatcher.executor().is_none());

        let executor = Arc::new(ManualExecutor::new());
        context.register_executor(executor.clone());

        let counter = Arc::new(CountingHandler::new());
        dispatcher.register(MatchAll, AsyncHandler::wrap(counter.clone()));
        dispatcher
            .emit(ContextLifecycleEvent::new("cluster-a", LifecycleStage::Started))
            .unwrap();

        assert_eq!(executor.run_pending(), 1);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_start_announces_started() {
        let context = ServiceContext::new("cluster-a");
        let dispatcher = context.create_dispatcher(DispatcherConfig::default());
        let journal = Journal::new();

        dispatcher.register(
            EventTypeFilter::<ContextLifecycleEvent>::new(),
            handler_fn("stage", {
                let journal = journal.clone();
                move |_, event: &SharedEvent| {
                    if let Some(lifecycle) = event.downcast_ref::<ContextLifecycleEvent>() {
                        journal.push(format!("{}:{:?}", lifecycle.context_name(), lifecycle.stage()));
                    }
                    Ok(())
                }
            }),
        );

        context.start().unwrap();
        context.shutdown().unwrap();

        assert_eq!(
            journal.entries(),
            vec!["cluster-a:Started", "cluster-a:Stopping"]
        );
    }

    #[test]
    fn test_start_without_dispatcher_fails() {
        let context = ServiceContext::new("cluster-a");
        assert!(matches!(
            context.start(),
            Err(EventsError::NoDispatcherBound { .. })
        ));
    }

    #[test]
    fn test_shutdown_unbinds_and_clears() {
        let context = ServiceContext::new("cluster-a");
        let dispatcher = context.create_dispatcher(DispatcherConfig::default());
        let journal = Journal::new();
        dispatcher.register(MatchAll, Arc::new(LifecycleProbe::new("probe", journal.clone())));

        context.shutdown().unwrap();

        assert!(context.dispatcher().is_none());
        assert_eq!(dispatcher.handler_count(), 0);
        let entries = journal.entries();
        // The probe saw the Stopping announcement before being removed.
        let process = entries.iter().position(|e| e == "process:probe").unwrap();
        let removed = entries.iter().position(|e| e == "unregistered:probe").unwrap();
        assert!(process < removed);
    }

    #[test]
    fn test_shutdown_tears_down_despite_failing_handler() {
        let context = ServiceContext::new("cluster-a");
        let dispatcher = context.create_dispatcher(DispatcherConfig::default());
        dispatcher.register(MatchAll, handler_fn("refuses", |_, _| anyhow::bail!("busy")));

        assert!(context.shutdown().is_err());
        assert!(context.dispatcher().is_none());
        assert_eq!(dispatcher.handler_count(), 0);

        // Second shutdown has nothing to do.
        context.shutdown().unwrap();
    }
}
