//! Partition lifecycle events.
//!
//! A partitioned service spreads its data over a fixed number of partitions,
//! each owned by one cluster member at a time. When ownership moves the cache
//! runtime raises low-level signals; the [`translator`](crate::translator)
//! turns those into the events defined here.
//!
//! | Event                          | Phased?                        | Transfer? |
//! |--------------------------------|--------------------------------|-----------|
//! | [`PartitionAssignedEvent`]     | no                             | no        |
//! | [`PartitionLostEvent`]         | no                             | no        |
//! | [`PartitionArrivingEvent`]     | Commenced / Completed          | yes       |
//! | [`PartitionDepartingEvent`]    | Commenced / Completed / Aborted| yes       |
//! | [`PartitionRecoveringEvent`]   | Commenced / Completed          | no        |
//!
//! The partition set and service are owned by the caller and shared by
//! reference; nothing here mutates them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ServiceContext;
use crate::core::{AbortablePhasedEvent, Event, Phase, PhasedEvent};

// =============================================================================
// Member Identity
// =============================================================================

/// Identifier of a peer cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(Uuid);

impl MemberId {
    /// Create a new random member ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MemberId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<MemberId> for Uuid {
    fn from(id: MemberId) -> Uuid {
        id.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Partition Set
// =============================================================================

/// A set of partition numbers out of a service's fixed partition count.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PartitionSet {
    partition_count: u32,
    bits: Vec<u64>,
}

impl PartitionSet {
    /// Create an empty set for a service with `partition_count` partitions.
    pub fn new(partition_count: u32) -> Self {
        let words = (partition_count as usize).div_ceil(64);
        Self {
            partition_count,
            bits: vec![0; words],
        }
    }

    /// Create a set containing the given partitions.
    ///
    /// Partitions outside `0..partition_count` are ignored.
    pub fn with_partitions(partition_count: u32, partitions: impl IntoIterator<Item = u32>) -> Self {
        let mut set = Self::new(partition_count);
        for partition in partitions {
            set.add(partition);
        }
        set
    }

    /// Add a partition. Returns false if it was already present or out of range.
    pub fn add(&mut self, partition: u32) -> bool {
        if partition >= self.partition_count {
            return false;
        }
        let (word, mask) = Self::locate(partition);
        let added = self.bits[word] & mask == 0;
        self.bits[word] |= mask;
        added
    }

    /// Remove a partition. Returns false if it was not present.
    pub fn remove(&mut self, partition: u32) -> bool {
        if !self.contains(partition) {
            return false;
        }
        let (word, mask) = Self::locate(partition);
        self.bits[word] &= !mask;
        true
    }

    /// Returns true if the partition is in the set.
    pub fn contains(&self, partition: u32) -> bool {
        if partition >= self.partition_count {
            return false;
        }
        let (word, mask) = Self::locate(partition);
        self.bits[word] & mask != 0
    }

    /// Number of partitions in the set.
    pub fn cardinality(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if no partition is in the set.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// Total partition count of the owning service.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Iterate the partitions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.partition_count).filter(move |p| self.contains(*p))
    }

    fn locate(partition: u32) -> (usize, u64) {
        ((partition / 64) as usize, 1u64 << (partition % 64))
    }
}

impl fmt::Debug for PartitionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for PartitionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionSet{{")?;
        for (i, p) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, "}}")
    }
}

// =============================================================================
// Partitioned Service
// =============================================================================

/// Reference to the partitioned service that raised a notification.
///
/// The service belongs to a [`ServiceContext`], which is where the dispatcher
/// for its events is bound.
pub struct PartitionedService {
    name: String,
    partition_count: u32,
    context: Arc<ServiceContext>,
}

impl PartitionedService {
    /// Create a service reference.
    pub fn new(name: impl Into<String>, partition_count: u32, context: Arc<ServiceContext>) -> Self {
        Self {
            name: name.into(),
            partition_count,
            context,
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of partitions.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// The context that owns this service.
    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }
}

impl fmt::Debug for PartitionedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedService")
            .field("name", &self.name)
            .field("partition_count", &self.partition_count)
            .field("context", &self.context.name())
            .finish()
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// An event about a set of partitions of a partitioned service.
pub trait PartitionEvent: Event {
    /// The service that owns the partitions.
    fn service(&self) -> &Arc<PartitionedService>;

    /// The affected partitions.
    fn partitions(&self) -> &Arc<PartitionSet>;
}

/// A partition event describing movement between two members.
pub trait PartitionTransferEvent: PartitionEvent {
    /// Member the partitions move away from, if known.
    fn source(&self) -> Option<MemberId>;

    /// Member the partitions move to, if known.
    fn destination(&self) -> Option<MemberId>;
}

macro_rules! partition_event_common {
    ($ty:ty) => {
        impl PartitionEvent for $ty {
            fn service(&self) -> &Arc<PartitionedService> {
                &self.service
            }

            fn partitions(&self) -> &Arc<PartitionSet> {
                &self.partitions
            }
        }
    };
}

// =============================================================================
// Simple Events
// =============================================================================

/// Ownership of partitions was granted to this member, at startup or after loss.
#[derive(Debug, Clone)]
pub struct PartitionAssignedEvent {
    service: Arc<PartitionedService>,
    partitions: Arc<PartitionSet>,
}

impl PartitionAssignedEvent {
    pub fn new(service: Arc<PartitionedService>, partitions: Arc<PartitionSet>) -> Self {
        Self {
            service,
            partitions,
        }
    }
}

impl Event for PartitionAssignedEvent {
    fn event_name(&self) -> &'static str {
        "PartitionAssigned"
    }

    fn as_partition_event(&self) -> Option<&dyn PartitionEvent> {
        Some(self)
    }
}

partition_event_common!(PartitionAssignedEvent);

/// This member assumed ownership of partitions whose owner was lost without a backup.
#[derive(Debug, Clone)]
pub struct PartitionLostEvent {
    service: Arc<PartitionedService>,
    partitions: Arc<PartitionSet>,
}

impl PartitionLostEvent {
    pub fn new(service: Arc<PartitionedService>, partitions: Arc<PartitionSet>) -> Self {
        Self {
            service,
            partitions,
        }
    }
}

impl Event for PartitionLostEvent {
    fn event_name(&self) -> &'static str {
        "PartitionLost"
    }

    fn as_partition_event(&self) -> Option<&dyn PartitionEvent> {
        Some(self)
    }
}

partition_event_common!(PartitionLostEvent);

// =============================================================================
// Phased Events
// =============================================================================

/// Partitions are being transferred to this member from a known peer.
///
/// Only [`Phase::Commenced`] and [`Phase::Completed`] are constructible.
#[derive(Debug, Clone)]
pub struct PartitionArrivingEvent {
    service: Arc<PartitionedService>,
    partitions: Arc<PartitionSet>,
    source: MemberId,
    destination: Option<MemberId>,
    phase: Phase,
}

impl PartitionArrivingEvent {
    /// The transfer has begun.
    pub fn commenced(
        service: Arc<PartitionedService>,
        partitions: Arc<PartitionSet>,
        source: MemberId,
        destination: Option<MemberId>,
    ) -> Self {
        Self {
            service,
            partitions,
            source,
            destination,
            phase: Phase::Commenced,
        }
    }

    /// The transfer has been committed.
    pub fn completed(
        service: Arc<PartitionedService>,
        partitions: Arc<PartitionSet>,
        source: MemberId,
        destination: Option<MemberId>,
    ) -> Self {
        Self {
            service,
            partitions,
            source,
            destination,
            phase: Phase::Completed,
        }
    }

    /// The member sending the partitions.
    pub fn source_member(&self) -> MemberId {
        self.source
    }
}

impl Event for PartitionArrivingEvent {
    fn event_name(&self) -> &'static str {
        "PartitionArriving"
    }

    fn as_phased(&self) -> Option<&dyn PhasedEvent> {
        Some(self)
    }

    fn as_partition_event(&self) -> Option<&dyn PartitionEvent> {
        Some(self)
    }

    fn as_transfer_event(&self) -> Option<&dyn PartitionTransferEvent> {
        Some(self)
    }
}

impl PhasedEvent for PartitionArrivingEvent {
    fn phase(&self) -> Phase {
        self.phase
    }
}

partition_event_common!(PartitionArrivingEvent);

impl PartitionTransferEvent for PartitionArrivingEvent {
    fn source(&self) -> Option<MemberId> {
        Some(self.source)
    }

    fn destination(&self) -> Option<MemberId> {
        self.destination
    }
}

/// Partitions are being transferred away from this member.
#[derive(Debug, Clone)]
pub struct PartitionDepartingEvent {
    service: Arc<PartitionedService>,
    partitions: Arc<PartitionSet>,
    source: Option<MemberId>,
    destination: Option<MemberId>,
    phase: Phase,
}

impl PartitionDepartingEvent {
    fn with_phase(
        service: Arc<PartitionedService>,
        partitions: Arc<PartitionSet>,
        source: Option<MemberId>,
        destination: Option<MemberId>,
        phase: Phase,
    ) -> Self {
        Self {
            service,
            partitions,
            source,
            destination,
            phase,
        }
    }

    /// The transfer has begun.
    pub fn commenced(
        service: Arc<PartitionedService>,
        partitions: Arc<PartitionSet>,
        source: Option<MemberId>,
        destination: Option<MemberId>,
    ) -> Self {
        Self::with_phase(service, partitions, source, destination, Phase::Commenced)
    }

    /// The transfer has been committed; the partitions now belong to the destination.
    pub fn completed(
        service: Arc<PartitionedService>,
        partitions: Arc<PartitionSet>,
        source: Option<MemberId>,
        destination: Option<MemberId>,
    ) -> Self {
        Self::with_phase(service, partitions, source, destination, Phase::Completed)
    }

    /// The transfer was rolled back; the partitions stay with this member.
    pub fn aborted(
        service: Arc<PartitionedService>,
        partitions: Arc<PartitionSet>,
        source: Option<MemberId>,
        destination: Option<MemberId>,
    ) -> Self {
        Self::with_phase(service, partitions, source, destination, Phase::Aborted)
    }
}

impl Event for PartitionDepartingEvent {
    fn event_name(&self) -> &'static str {
        "PartitionDeparting"
    }

    fn as_phased(&self) -> Option<&dyn PhasedEvent> {
        Some(self)
    }

    fn as_abortable(&self) -> Option<&dyn AbortablePhasedEvent> {
        Some(self)
    }

    fn as_partition_event(&self) -> Option<&dyn PartitionEvent> {
        Some(self)
    }

    fn as_transfer_event(&self) -> Option<&dyn PartitionTransferEvent> {
        Some(self)
    }
}

impl PhasedEvent for PartitionDepartingEvent {
    fn phase(&self) -> Phase {
        self.phase
    }
}

impl AbortablePhasedEvent for PartitionDepartingEvent {}

partition_event_common!(PartitionDepartingEvent);

impl PartitionTransferEvent for PartitionDepartingEvent {
    fn source(&self) -> Option<MemberId> {
        self.source
    }

    fn destination(&self) -> Option<MemberId> {
        self.destination
    }
}

/// Partitions are being restored on this member from persistent storage
/// rather than received from a peer.
#[derive(Debug, Clone)]
pub struct PartitionRecoveringEvent {
    service: Arc<PartitionedService>,
    partitions: Arc<PartitionSet>,
    phase: Phase,
}

impl PartitionRecoveringEvent {
    /// Recovery has begun.
    pub fn commenced(service: Arc<PartitionedService>, partitions: Arc<PartitionSet>) -> Self {
        Self {
            service,
            partitions,
            phase: Phase::Commenced,
        }
    }

    /// Recovery has finished.
    pub fn completed(service: Arc<PartitionedService>, partitions: Arc<PartitionSet>) -> Self {
        Self {
            service,
            partitions,
            phase: Phase::Completed,
        }
    }
}

impl Event for PartitionRecoveringEvent {
    fn event_name(&self) -> &'static str {
        "PartitionRecovering"
    }

    fn as_phased(&self) -> Option<&dyn PhasedEvent> {
        Some(self)
    }

    fn as_partition_event(&self) -> Option<&dyn PartitionEvent> {
        Some(self)
    }
}

impl PhasedEvent for PartitionRecoveringEvent {
    fn phase(&self) -> Phase {
        self.phase
    }
}

partition_event_common!(PartitionRecoveringEvent);
