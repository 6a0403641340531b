//! Partition notification translator.
//!
//! The cache runtime reports partition movement as discrete low-level signals.
//! [`PartitionTranslator`] maps each one to a partition event and broadcasts
//! it.
//!
//! | Signal             | Source known? | Event                      | Phase     |
//! |--------------------|---------------|----------------------------|-----------|
//! | `Assigned`         | -             | `PartitionAssignedEvent`   | -         |
//! | `Lost`             | -             | `PartitionLostEvent`       | -         |
//! | `ReceiveBegin`     | no            | `PartitionRecoveringEvent` | Commenced |
//! | `ReceiveCommit`    | no            | `PartitionRecoveringEvent` | Completed |
//! | `ReceiveBegin`     | yes           | `PartitionArrivingEvent`   | Commenced |
//! | `ReceiveCommit`    | yes           | `PartitionArrivingEvent`   | Completed |
//! | `TransmitBegin`    | -             | `PartitionDepartingEvent`  | Commenced |
//! | `TransmitCommit`   | -             | `PartitionDepartingEvent`  | Completed |
//! | `TransmitRollback` | -             | `PartitionDepartingEvent`  | Aborted   |
//!
//! Translation is stateless. A transfer is never tracked across its begin and
//! commit signals, and signals are neither buffered nor reordered. Unknown raw
//! codes produce nothing.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::core::SharedEvent;
use crate::dispatch::EventDispatcher;
use crate::error::EventsError;
use crate::partition::{
    MemberId, PartitionArrivingEvent, PartitionAssignedEvent, PartitionDepartingEvent,
    PartitionLostEvent, PartitionRecoveringEvent, PartitionSet, PartitionedService,
};

/// Low-level partition signal raised by the cache runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionSignal {
    Lost,
    TransmitBegin,
    TransmitCommit,
    TransmitRollback,
    ReceiveBegin,
    ReceiveCommit,
    Assigned,
}

impl PartitionSignal {
    /// Decode a raw signal code. Unknown codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Lost),
            2 => Some(Self::TransmitBegin),
            3 => Some(Self::TransmitCommit),
            4 => Some(Self::TransmitRollback),
            5 => Some(Self::ReceiveBegin),
            6 => Some(Self::ReceiveCommit),
            7 => Some(Self::Assigned),
            _ => None,
        }
    }

    /// The raw code of this signal.
    pub fn code(self) -> u32 {
        match self {
            Self::Lost => 1,
            Self::TransmitBegin => 2,
            Self::TransmitCommit => 3,
            Self::TransmitRollback => 4,
            Self::ReceiveBegin => 5,
            Self::ReceiveCommit => 6,
            Self::Assigned => 7,
        }
    }
}

/// A partition notification exactly as the cache runtime delivers it.
#[derive(Clone)]
pub struct RawPartitionNotification {
    pub code: u32,
    pub service: Arc<PartitionedService>,
    pub partitions: Arc<PartitionSet>,
    /// Sending member, for transfer-shaped signals. Absent when the
    /// partitions are being recovered rather than received.
    pub source: Option<MemberId>,
    pub destination: Option<MemberId>,
}

impl RawPartitionNotification {
    pub fn new(code: u32, service: Arc<PartitionedService>, partitions: Arc<PartitionSet>) -> Self {
        Self {
            code,
            service,
            partitions,
            source: None,
            destination: None,
        }
    }

    /// Build a notification from a known signal.
    pub fn from_signal(
        signal: PartitionSignal,
        service: Arc<PartitionedService>,
        partitions: Arc<PartitionSet>,
    ) -> Self {
        Self::new(signal.code(), service, partitions)
    }

    pub fn with_source(mut self, source: MemberId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_destination(mut self, destination: MemberId) -> Self {
        self.destination = Some(destination);
        self
    }

    /// The decoded signal, if the code is known.
    pub fn signal(&self) -> Option<PartitionSignal> {
        PartitionSignal::from_code(self.code)
    }
}

impl fmt::Debug for RawPartitionNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPartitionNotification")
            .field("code", &self.code)
            .field("service", &self.service.name())
            .field("partitions", &self.partitions)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .finish()
    }
}

/// Turns raw partition notifications into partition events and dispatches
/// them.
///
/// An injected dispatcher wins. Without one, each notification is dispatched
/// through the dispatcher bound to the service's
/// [`ServiceContext`](crate::ServiceContext); if that context has none bound the notification
/// fails with [`EventsError::NoDispatcherBound`]. Partition lifecycle events
/// can signal data loss, so they are never dropped silently.
#[derive(Debug, Clone, Default)]
pub struct PartitionTranslator {
    dispatcher: Option<EventDispatcher>,
}

impl PartitionTranslator {
    /// Translator that resolves the dispatcher from each service's context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Translator that always dispatches through `dispatcher`.
    pub fn with_dispatcher(dispatcher: EventDispatcher) -> Self {
        Self {
            dispatcher: Some(dispatcher),
        }
    }

    /// Map a notification to its event without dispatching it.
    pub fn translate(&self, raw: &RawPartitionNotification) -> Option<SharedEvent> {
        let signal = raw.signal()?;
        let service = raw.service.clone();
        let partitions = raw.partitions.clone();

        let event: SharedEvent = match (signal, raw.source) {
            (PartitionSignal::Assigned, _) => Arc::new(PartitionAssignedEvent::new(service, partitions)),
            (PartitionSignal::Lost, _) => Arc::new(PartitionLostEvent::new(service, partitions)),
            (PartitionSignal::ReceiveBegin, None) => {
                Arc::new(PartitionRecoveringEvent::commenced(service, partitions))
            }
            (PartitionSignal::ReceiveCommit, None) => {
                Arc::new(PartitionRecoveringEvent::completed(service, partitions))
            }
            (PartitionSignal::ReceiveBegin, Some(source)) => Arc::new(PartitionArrivingEvent::commenced(
                service,
                partitions,
                source,
                raw.destination,
            )),
            (PartitionSignal::ReceiveCommit, Some(source)) => Arc::new(PartitionArrivingEvent::completed(
                service,
                partitions,
                source,
                raw.destination,
            )),
            (PartitionSignal::TransmitBegin, source) => Arc::new(PartitionDepartingEvent::commenced(
                service,
                partitions,
                source,
                raw.destination,
            )),
            (PartitionSignal::TransmitCommit, source) => Arc::new(PartitionDepartingEvent::completed(
                service,
                partitions,
                source,
                raw.destination,
            )),
            (PartitionSignal::TransmitRollback, source) => Arc::new(PartitionDepartingEvent::aborted(
                service,
                partitions,
                source,
                raw.destination,
            )),
        };

        Some(event)
    }

    /// Translate and broadcast a notification.
    ///
    /// Returns the dispatched event, or `None` for an unknown code (nothing is
    /// looked up or dispatched in that case). Handler failures propagate.
    pub fn on_notification(
        &self,
        raw: &RawPartitionNotification,
    ) -> Result<Option<SharedEvent>, EventsError> {
        let Some(event) = self.translate(raw) else {
            trace!(code = raw.code, service = raw.service.name(), "ignoring unknown partition signal");
            return Ok(None);
        };

        let dispatcher = match &self.dispatcher {
            Some(dispatcher) => dispatcher.clone(),
            None => raw.service.context().require_dispatcher().map_err(|e| {
                error!(
                    service = raw.service.name(),
                    event = event.event_name(),
                    error = %e,
                    "partition event has no dispatcher"
                );
                e
            })?,
        };

        trace!(
            service = raw.service.name(),
            event = event.event_name(),
            partitions = raw.partitions.cardinality(),
            "dispatching partition event"
        );
        dispatcher.dispatch(&event)?;
        Ok(Some(event))
    }
}
