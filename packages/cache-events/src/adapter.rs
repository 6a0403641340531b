//! Typed handler adapters.
//!
//! One listener object often wants several handlers, one per event type. The
//! builder here declares each (event type, function) pair up front and turns it
//! into an ordinary handler registered against an
//! [`EventTypeFilter`](crate::EventTypeFilter) for that type.
//!
//! # Example
//!
//! ```ignore
//! let listener = Arc::new(RebalanceMonitor::default());
//!
//! let handlers = TypedHandlers::builder("rebalance-monitor")
//!     .on::<PartitionLostEvent, _>({
//!         let listener = listener.clone();
//!         move |_, event| listener.on_lost(event)
//!     })
//!     .on_async::<PartitionArrivingEvent, _>({
//!         let listener = listener.clone();
//!         move |_, event| listener.on_arriving(event)
//!     })
//!     .build();
//!
//! handlers.register_with(&dispatcher);
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;

use crate::core::{Event, SharedEvent};
use crate::dispatch::EventDispatcher;
use crate::filter::{EventTypeFilter, FilterKey};
use crate::handler::{AsyncHandler, EventHandler, HandlerRef};

// =============================================================================
// Typed Handler
// =============================================================================

/// Handler for a single concrete event type.
///
/// Events of any other type are ignored.
pub struct TypedHandler<E, F> {
    name: String,
    f: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> TypedHandler<E, F>
where
    E: Event,
    F: Fn(&EventDispatcher, &E) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _event: PhantomData,
        }
    }
}

impl<E, F> EventHandler for TypedHandler<E, F>
where
    E: Event,
    F: Fn(&EventDispatcher, &E) -> Result<()> + Send + Sync + 'static,
{
    fn process(&self, dispatcher: &EventDispatcher, event: &SharedEvent) -> Result<()> {
        let Some(event) = event.downcast_ref::<E>() else {
            return Ok(());
        };
        (self.f)(dispatcher, event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Handler Set
// =============================================================================

/// A set of typed handlers belonging to one listener.
pub struct TypedHandlers {
    name: String,
    handlers: Vec<(FilterKey, HandlerRef)>,
}

impl TypedHandlers {
    pub fn builder(name: impl Into<String>) -> TypedHandlersBuilder {
        TypedHandlersBuilder {
            name: name.into(),
            handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register every handler. Returns how many were newly registered.
    pub fn register_with(&self, dispatcher: &EventDispatcher) -> usize {
        self.handlers
            .iter()
            .filter(|(filter, handler)| dispatcher.register(filter.clone(), handler.clone()))
            .count()
    }

    /// Unregister every handler. Returns how many were removed.
    pub fn unregister_from(&self, dispatcher: &EventDispatcher) -> usize {
        self.handlers
            .iter()
            .filter(|(filter, handler)| dispatcher.unregister(filter.clone(), handler))
            .count()
    }

    /// The (filter, handler) pairs in declaration order.
    pub fn handlers(&self) -> impl Iterator<Item = (&FilterKey, &HandlerRef)> {
        self.handlers.iter().map(|(filter, handler)| (filter, handler))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for TypedHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedHandlers")
            .field("name", &self.name)
            .field(
                "handlers",
                &self.handlers.iter().map(|(_, h)| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`TypedHandlers`].
pub struct TypedHandlersBuilder {
    name: String,
    handlers: Vec<(FilterKey, HandlerRef)>,
}

impl TypedHandlersBuilder {
    /// Handle events of type `E` inline.
    pub fn on<E, F>(mut self, f: F) -> Self
    where
        E: Event,
        F: Fn(&EventDispatcher, &E) -> Result<()> + Send + Sync + 'static,
    {
        let handler: HandlerRef = Arc::new(TypedHandler::new(self.handler_name::<E>(), f));
        self.handlers
            .push((EventTypeFilter::<E>::new().into(), handler));
        self
    }

    /// Handle events of type `E` on the dispatcher's executor.
    pub fn on_async<E, F>(mut self, f: F) -> Self
    where
        E: Event,
        F: Fn(&EventDispatcher, &E) -> Result<()> + Send + Sync + 'static,
    {
        let inner: HandlerRef = Arc::new(TypedHandler::new(self.handler_name::<E>(), f));
        self.handlers
            .push((EventTypeFilter::<E>::new().into(), AsyncHandler::wrap(inner)));
        self
    }

    pub fn build(self) -> TypedHandlers {
        TypedHandlers {
            name: self.name,
            handlers: self.handlers,
        }
    }

    fn handler_name<E>(&self) -> String {
        let event = std::any::type_name::<E>();
        let base = event.split('<').next().unwrap_or(event);
        let short = base.rsplit("::").next().unwrap_or(base);
        format!("{}::on<{}>", self.name, short)
    }
}
