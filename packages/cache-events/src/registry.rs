//! Filter-indexed subscriber registry.
//!
//! Maps each distinct filter (by value) to the ordered set of handlers
//! registered against it (by identity).
//!
//! ```text
//!   FilterKey ──► Bucket = Arc<[HandlerRef]>      (copy-on-write)
//!
//!   register:    [lock] check+claim ─► before_registered ─► [lock] clone+push ─► after_registered
//!   unregister:  [lock] clone-without / drop empty bucket ─► after_unregistered
//!   dispatch:    snapshot matching buckets (no lock) ─► invoke
//! ```
//!
//! Dispatch never takes the write lock: buckets are immutable slices swapped
//! wholesale, so a dispatch already holding a snapshot is unaffected by a
//! concurrent (un)registration. Lifecycle hooks run after every lock and map
//! guard has been released.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use smallvec::SmallVec;

use crate::core::Event;
use crate::filter::FilterKey;
use crate::handler::{same_handler, HandlerRef};

/// Handlers registered against one filter, in registration order.
pub(crate) type Bucket = Arc<[HandlerRef]>;

/// Snapshot of the buckets whose filter matched an event.
pub(crate) type Snapshot = SmallVec<[Bucket; 4]>;

/// Outcome of a registration attempt.
pub(crate) enum Registration {
    /// The pair is already present.
    Duplicate,
    /// The pair was inserted.
    Inserted,
}

pub(crate) struct SubscriberRegistry {
    buckets: DashMap<FilterKey, Bucket>,
    // Serialises the read-modify-write of a bucket and guards the pairs whose
    // `before_insert` hook is still running. Readers never take it.
    write_lock: Mutex<Vec<(FilterKey, HandlerRef)>>,
}

/// Claim on a pair that is between its duplicate check and publication.
///
/// Released on drop, including when the `before_insert` hook unwinds.
struct PendingClaim<'a> {
    registry: &'a SubscriberRegistry,
    filter: &'a FilterKey,
    handler: &'a HandlerRef,
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .retain(|(f, h)| !(f == self.filter && same_handler(h, self.handler)));
    }
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            write_lock: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(FilterKey, HandlerRef)>> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bucket(&self, filter: &FilterKey) -> Option<Bucket> {
        // Clone out so the shard guard is released before returning.
        self.buckets.get(filter).map(|bucket| bucket.value().clone())
    }

    /// Returns true if `handler` is registered against `filter`.
    pub(crate) fn contains(&self, filter: &FilterKey, handler: &HandlerRef) -> bool {
        self.bucket(filter)
            .is_some_and(|bucket| bucket.iter().any(|h| same_handler(h, handler)))
    }

    /// Insert the pair unless it already exists.
    ///
    /// The duplicate check and the pending claim are taken under the write
    /// lock, so of several identical concurrent inserts exactly one runs
    /// `before_insert`. The hook runs with no lock held, before the pair
    /// becomes visible. Callers that find the pair present or pending get
    /// `Duplicate` without running their hook.
    pub(crate) fn insert(
        &self,
        filter: &FilterKey,
        handler: &HandlerRef,
        before_insert: impl FnOnce(),
    ) -> Registration {
        {
            let mut pending = self.lock();
            let is_pending = pending
                .iter()
                .any(|(f, h)| f == filter && same_handler(h, handler));
            if is_pending || self.contains(filter, handler) {
                return Registration::Duplicate;
            }
            pending.push((filter.clone(), handler.clone()));
        }
        let _claim = PendingClaim {
            registry: self,
            filter,
            handler,
        };

        before_insert();

        let _guard = self.lock();
        let next: Bucket = match self.bucket(filter) {
            Some(bucket) => bucket
                .iter()
                .cloned()
                .chain(std::iter::once(handler.clone()))
                .collect(),
            None => Arc::from(vec![handler.clone()]),
        };

        self.buckets.insert(filter.clone(), next);
        // The claim is released after `_guard`; by then the pair is visible.
        Registration::Inserted
    }

    /// Remove the pair. Returns true if it was present.
    pub(crate) fn remove(&self, filter: &FilterKey, handler: &HandlerRef) -> bool {
        let _guard = self.lock();

        let Some(bucket) = self.bucket(filter) else {
            return false;
        };
        if !bucket.iter().any(|h| same_handler(h, handler)) {
            return false;
        }

        let remaining: Vec<HandlerRef> = bucket
            .iter()
            .filter(|h| !same_handler(h, handler))
            .cloned()
            .collect();

        if remaining.is_empty() {
            self.buckets.remove(filter);
        } else {
            self.buckets.insert(filter.clone(), Arc::from(remaining));
        }
        true
    }

    /// Remove every pair, returning them in bucket order.
    pub(crate) fn drain(&self) -> Vec<(FilterKey, HandlerRef)> {
        let _guard = self.lock();

        let filters: Vec<FilterKey> = self.buckets.iter().map(|e| e.key().clone()).collect();
        let mut removed = Vec::new();
        for filter in filters {
            if let Some((filter, bucket)) = self.buckets.remove(&filter) {
                removed.extend(bucket.iter().map(|h| (filter.clone(), h.clone())));
            }
        }
        removed
    }

    /// Buckets whose filter accepts `event`.
    ///
    /// Filters are evaluated after the snapshot is taken, outside any map
    /// guard, so an evaluating filter may itself touch the registry.
    pub(crate) fn matching(&self, event: &dyn Event) -> Snapshot {
        let entries: SmallVec<[(FilterKey, Bucket); 8]> = self
            .buckets
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        entries
            .into_iter()
            .filter(|(filter, _)| filter.evaluate(event))
            .map(|(_, bucket)| bucket)
            .collect()
    }

    pub(crate) fn filter_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.buckets.iter().map(|e| e.value().len()).sum()
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("filter_count", &self.filter_count())
            .field("handler_count", &self.handler_count())
            .finish()
    }
}
