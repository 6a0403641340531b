//! Core event traits for the cache-events dispatching model.
//!
//! # Overview
//!
//! Every notification is an [`Event`]: an immutable description of something
//! that occurred. Events carry no identity beyond their concrete type and
//! fields. They are built by a producer immediately before dispatch and are
//! shared with handlers as [`SharedEvent`] (`Arc<dyn Event>`).
//!
//! # Capabilities
//!
//! Rather than a class hierarchy, an event advertises what it is through
//! capability accessors on the [`Event`] trait:
//!
//! | Accessor                 | Capability                   | Implemented by                         |
//! |--------------------------|------------------------------|----------------------------------------|
//! | `as_cache_event`         | [`CacheEvent`]               | entry events                           |
//! | `as_phased`              | [`PhasedEvent`]              | arriving, departing, recovering        |
//! | `as_abortable`           | [`AbortablePhasedEvent`]     | departing                              |
//! | `as_partition_event`     | [`PartitionEvent`]           | all partition events                   |
//! | `as_transfer_event`      | [`PartitionTransferEvent`]   | arriving, departing                    |
//!
//! Filters and handlers are written against the narrowest capability they
//! need, and reach a concrete variant with [`downcast_ref`](trait.Event.html#method.downcast_ref).
//!
//! [`PartitionEvent`]: crate::partition::PartitionEvent
//! [`PartitionTransferEvent`]: crate::partition::PartitionTransferEvent

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::partition::{PartitionEvent, PartitionTransferEvent};

/// A shared, immutable event as it flows through the dispatcher.
pub type SharedEvent = Arc<dyn Event>;

/// Upcast helper so `dyn Event` can be downcast to its concrete type.
///
/// Implemented for every `'static` type. Call it on `&dyn Event`, never on the
/// `Arc` itself, otherwise the `Arc` is what gets upcast.
pub trait AsAny {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A fact - something that happened.
///
/// Events are immutable once constructed. The dispatcher never mutates them and
/// handlers only ever see shared references.
///
/// Only [`event_name`](Event::event_name) has no default; the capability
/// accessors return `None` unless the concrete type overrides them.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug)]
/// struct CacheCleared { cache: String }
///
/// impl Event for CacheCleared {
///     fn event_name(&self) -> &'static str { "CacheCleared" }
///
///     fn as_cache_event(&self) -> Option<&dyn CacheEvent> { Some(self) }
/// }
///
/// impl CacheEvent for CacheCleared {
///     fn cache_name(&self) -> &str { &self.cache }
/// }
/// ```
pub trait Event: AsAny + fmt::Debug + Send + Sync + 'static {
    /// Short, stable name of the event type (used in logs).
    fn event_name(&self) -> &'static str;

    /// Cache-scoped view of this event.
    fn as_cache_event(&self) -> Option<&dyn CacheEvent> {
        None
    }

    /// Phase-bearing view of this event.
    fn as_phased(&self) -> Option<&dyn PhasedEvent> {
        None
    }

    /// Abortable phase-bearing view of this event.
    fn as_abortable(&self) -> Option<&dyn AbortablePhasedEvent> {
        None
    }

    /// Partition-scoped view of this event.
    fn as_partition_event(&self) -> Option<&dyn PartitionEvent> {
        None
    }

    /// Partition transfer view of this event.
    fn as_transfer_event(&self) -> Option<&dyn PartitionTransferEvent> {
        None
    }
}

impl dyn Event {
    /// Downcast to a concrete event type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Returns true if the concrete type of this event is `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }
}

/// An event that concerns a named cache.
pub trait CacheEvent: Event {
    /// Name of the cache the event concerns.
    fn cache_name(&self) -> &str;
}

// =============================================================================
// Phases
// =============================================================================

/// Progress marker for an activity that spans time.
///
/// Plain phased events only ever report [`Commenced`](Phase::Commenced) or
/// [`Completed`](Phase::Completed); [`Aborted`](Phase::Aborted) is reserved for
/// [`AbortablePhasedEvent`]s. The event constructors enforce this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// The activity has started.
    Commenced,
    /// The activity finished successfully.
    Completed,
    /// The activity was rolled back before completing.
    Aborted,
}

impl Phase {
    /// Returns true for [`Phase::Commenced`].
    pub fn is_commenced(&self) -> bool {
        matches!(self, Phase::Commenced)
    }

    /// Returns true for [`Phase::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, Phase::Completed)
    }

    /// Returns true for [`Phase::Aborted`].
    pub fn is_aborted(&self) -> bool {
        matches!(self, Phase::Aborted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Commenced => write!(f, "commenced"),
            Phase::Completed => write!(f, "completed"),
            Phase::Aborted => write!(f, "aborted"),
        }
    }
}

/// An event describing one phase of a longer-running activity.
///
/// The phase is fixed at construction.
pub trait PhasedEvent: Event {
    /// The phase this event reports.
    fn phase(&self) -> Phase;
}

/// A phased event whose activity may also be aborted.
pub trait AbortablePhasedEvent: PhasedEvent {
    /// Returns true if the activity was rolled back.
    fn is_aborted(&self) -> bool {
        self.phase().is_aborted()
    }
}
