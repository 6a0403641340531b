//! # cache-events
//!
//! Filter-indexed event dispatch for a distributed cache, plus translation of
//! the cache runtime's partition-movement signals into phase-aware events.
//!
//! ## Core Concepts
//!
//! - [`Event`] = an immutable fact (an entry was inserted, partitions arrived)
//! - [`Filter`] = a pure predicate choosing which events a handler sees
//! - [`EventHandler`] = code invoked with each matching event
//!
//! Handlers are registered against filters. Equal filters share one bucket,
//! and handlers in a bucket run in registration order.
//!
//! ## Architecture
//!
//! ```text
//! Cache runtime
//!     │ raw partition signal           │ entry change
//!     ▼                                ▼
//! PartitionTranslator ──► event ──► EventDispatcher
//!                                      │
//!                     snapshot buckets whose filter matches
//!                                      │
//!          ┌───────────────────────────┼──────────────────────────┐
//!          ▼                           ▼                          ▼
//!   dispatch / dispatch_to       AsyncHandler               dispatch_later
//!   (caller's thread)            (executor thread)          (executor thread)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **At most one registration per pair** - registering the same handler
//!    against an equal filter again returns `false`
//! 2. **Bucket order** - handlers of one filter run in registration order;
//!    nothing else is ordered
//! 3. **Fail loud on the caller's thread** - a synchronous handler error stops
//!    the remaining deliveries and is returned
//! 4. **Isolated elsewhere** - deferred and asynchronous failures are logged
//!    and never reach the producer
//! 5. **No private threads** - background work goes to the host's
//!    [`TaskExecutor`]
//!
//! ## Example
//!
//! ```ignore
//! use cache_events::*;
//! use std::sync::Arc;
//!
//! let context = Arc::new(ServiceContext::new("cluster-a"));
//! context.register_executor(Arc::new(TokioExecutor::current().unwrap()));
//! let dispatcher = context.create_dispatcher(DispatcherConfig::from_env()?);
//!
//! TypedHandlers::builder("rebalance-monitor")
//!     .on::<PartitionLostEvent, _>(|_, event| {
//!         tracing::warn!(partitions = %event.partitions(), "partitions lost");
//!         Ok(())
//!     })
//!     .build()
//!     .register_with(&dispatcher);
//!
//! context.start()?;
//!
//! let service = Arc::new(PartitionedService::new("orders", 271, context.clone()));
//! let raw = RawPartitionNotification::from_signal(
//!     PartitionSignal::Lost,
//!     service,
//!     Arc::new(PartitionSet::with_partitions(271, [4, 5])),
//! );
//! PartitionTranslator::new().on_notification(&raw)?;
//! ```
//!
//! ## What This Is Not
//!
//! - Not the cache: entries and partitions are owned by the host
//! - Not a message broker: delivery is in-process and in-memory only
//! - Not a membership protocol: member identities are opaque

// Core modules
mod adapter;
mod cache;
mod config;
mod context;
mod core;
mod dispatch;
mod error;
mod executor;
mod filter;
mod handler;
mod partition;
mod registry;
mod resource;
mod translator;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;

// Re-export event model
pub use crate::core::{AbortablePhasedEvent, AsAny, CacheEvent, Event, Phase, PhasedEvent, SharedEvent};
pub use cache::{Entry, EntryEvent, EntryInsertedEvent, EntryRemovedEvent, EntryUpdatedEvent};
pub use partition::{
    MemberId, PartitionArrivingEvent, PartitionAssignedEvent, PartitionDepartingEvent,
    PartitionEvent, PartitionLostEvent, PartitionRecoveringEvent, PartitionSet,
    PartitionTransferEvent, PartitionedService,
};

// Re-export filters
pub use filter::{AllOf, CacheNameFilter, EventTypeFilter, Filter, FilterKey, MatchAll, PhaseFilter};

// Re-export handler types
pub use adapter::{TypedHandler, TypedHandlers, TypedHandlersBuilder};
pub use handler::{handler_fn, AsyncHandler, EventHandler, FnHandler, HandlerLifecycle, HandlerRef};

// Re-export dispatcher types
pub use dispatch::{EventDispatcher, EventDispatcherBuilder};
pub use executor::{Task, TaskExecutor, TokioExecutor};

// Re-export context and resources
pub use context::{ContextLifecycleEvent, LifecycleStage, ServiceContext};
pub use resource::ResourceRegistry;

// Re-export partition translation
pub use translator::{PartitionSignal, PartitionTranslator, RawPartitionNotification};

// Re-export configuration and errors
pub use config::{DispatcherConfig, SLOW_HANDLER_ENV};
pub use error::EventsError;
