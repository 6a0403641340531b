//! Filters - side-effect-free predicates that select which handlers see an event.
//!
//! A filter is also the registry key: two filters that compare equal share one
//! handler bucket. Any `Filter + Eq + Hash` type converts into a [`FilterKey`],
//! which provides equality and hashing across different filter types.
//!
//! # Standard Filters
//!
//! | Filter                 | Matches                                                   |
//! |------------------------|-----------------------------------------------------------|
//! | [`MatchAll`]           | every event                                               |
//! | [`CacheNameFilter`]    | cache-scoped events whose cache name matches a `*` glob   |
//! | [`EventTypeFilter`]    | events of one concrete type                               |
//! | [`PhaseFilter`]        | phased events in a given phase                            |
//! | [`AllOf`]              | events matched by every inner filter                      |

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::{Event, Phase};

/// A pure predicate over events.
///
/// `evaluate` must be side-effect free and idempotent: the dispatcher may call
/// it any number of times for the same event.
pub trait Filter: fmt::Debug + Send + Sync + 'static {
    /// Returns true if the event should be delivered.
    fn evaluate(&self, event: &dyn Event) -> bool;
}

/// Object-safe equality and hashing for heterogeneous filters.
trait DynFilter: Filter {
    fn filter_as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynFilter) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<F: Filter + Eq + Hash> DynFilter for F {
    fn filter_as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynFilter) -> bool {
        other
            .filter_as_any()
            .downcast_ref::<F>()
            .is_some_and(|other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<F>().hash(&mut state);
        self.hash(&mut state);
    }
}

// =============================================================================
// Filter Key
// =============================================================================

/// A type-erased filter compared by value.
///
/// Cheap to clone; the filter itself is shared and never copied.
#[derive(Clone)]
pub struct FilterKey(Arc<dyn DynFilter>);

impl FilterKey {
    /// Wrap a filter.
    pub fn new<F: Filter + Eq + Hash>(filter: F) -> Self {
        Self(Arc::new(filter))
    }

    /// Evaluate the wrapped filter.
    pub fn evaluate(&self, event: &dyn Event) -> bool {
        self.0.evaluate(event)
    }

    /// Downcast to the concrete filter type.
    pub fn downcast_ref<F: Filter>(&self) -> Option<&F> {
        self.0.filter_as_any().downcast_ref::<F>()
    }
}

impl<F: Filter + Eq + Hash> From<F> for FilterKey {
    fn from(filter: F) -> Self {
        Self::new(filter)
    }
}

impl PartialEq for FilterKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.dyn_eq(other.0.as_ref())
    }
}

impl Eq for FilterKey {}

impl Hash for FilterKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

// =============================================================================
// Standard Filters
// =============================================================================

/// Matches every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatchAll;

impl Filter for MatchAll {
    fn evaluate(&self, _event: &dyn Event) -> bool {
        true
    }
}

/// Matches cache-scoped events by cache name against a single-wildcard pattern.
///
/// Only the first `*` is honored: the text before it must be a literal prefix
/// of the cache name and everything after it is ignored. A pattern without `*`
/// must equal the name. Matching is case-sensitive. Events that are not
/// cache-scoped never match.
///
/// | Pattern   | `dist-me` | `dist-` | `dist` |
/// |-----------|-----------|---------|--------|
/// | `dist-*`  | yes       | yes     | no     |
/// | `d*`      | yes       | yes     | yes    |
/// | `*`       | yes       | yes     | yes    |
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheNameFilter {
    pattern: String,
}

impl CacheNameFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match a cache name against the pattern.
    pub fn matches(&self, cache_name: &str) -> bool {
        match self.pattern.find('*') {
            Some(star) => cache_name.starts_with(&self.pattern[..star]),
            None => self.pattern == cache_name,
        }
    }
}

impl Filter for CacheNameFilter {
    fn evaluate(&self, event: &dyn Event) -> bool {
        event
            .as_cache_event()
            .is_some_and(|cache| self.matches(cache.cache_name()))
    }
}

/// Matches events whose concrete type is `E`.
pub struct EventTypeFilter<E> {
    _marker: PhantomData<fn() -> E>,
}

impl<E: Event> EventTypeFilter<E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E: Event> Default for EventTypeFilter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventTypeFilter<E> {
    fn clone(&self) -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E> PartialEq for EventTypeFilter<E> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<E> Eq for EventTypeFilter<E> {}

impl<E> Hash for EventTypeFilter<E> {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

impl<E> fmt::Debug for EventTypeFilter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventTypeFilter")
            .field(&std::any::type_name::<E>())
            .finish()
    }
}

impl<E: Event> Filter for EventTypeFilter<E> {
    fn evaluate(&self, event: &dyn Event) -> bool {
        event.is::<E>()
    }
}

/// Matches phased events reporting the given phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseFilter {
    phase: Phase,
}

impl PhaseFilter {
    pub fn new(phase: Phase) -> Self {
        Self { phase }
    }
}

impl Filter for PhaseFilter {
    fn evaluate(&self, event: &dyn Event) -> bool {
        event
            .as_phased()
            .is_some_and(|phased| phased.phase() == self.phase)
    }
}

/// Matches events accepted by every inner filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllOf(Vec<FilterKey>);

impl AllOf {
    pub fn new(filters: impl IntoIterator<Item = FilterKey>) -> Self {
        Self(filters.into_iter().collect())
    }
}

impl Filter for AllOf {
    fn evaluate(&self, event: &dyn Event) -> bool {
        self.0.iter().all(|filter| filter.evaluate(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Entry, EntryInsertedEvent};
    use crate::core::{PhasedEvent, SharedEvent};
    use std::collections::hash_map::DefaultHasher;

    #[derive(Debug)]
    struct Ping;

    impl Event for Ping {
        fn event_name(&self) -> &'static str {
            "Ping"
        }
    }

    #[derive(Debug)]
    struct Step(Phase);

    impl Event for Step {
        fn event_name(&self) -> &'static str {
            "Step"
        }

        fn as_phased(&self) -> Option<&dyn PhasedEvent> {
            Some(self)
        }
    }

    impl PhasedEvent for Step {
        fn phase(&self) -> Phase {
            self.0
        }
    }

    fn cache_event(name: &str) -> SharedEvent {
        Arc::new(EntryInsertedEvent::new(name, Entry::new(1u32, 1u32)))
    }

    fn hash_of(key: &FilterKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_wildcard_suffix() {
        let filter = CacheNameFilter::new("dist-*");
        assert!(filter.matches("dist-me"));
        assert!(filter.matches("dist-"));
        assert!(!filter.matches("dist"));
        assert!(!filter.matches("Dist-me"));
    }

    #[test]
    fn test_bare_wildcard_matches_everything() {
        let filter = CacheNameFilter::new("*");
        assert!(filter.matches(""));
        assert!(filter.matches("dist-me"));
        assert!(filter.evaluate(&*cache_event("repl-anything")));
    }

    #[test]
    fn test_short_prefix() {
        let filter = CacheNameFilter::new("d*");
        assert!(filter.matches("dist-me"));
        assert!(!filter.matches("repl"));
    }

    #[test]
    fn test_only_first_wildcard_is_honored() {
        let filter = CacheNameFilter::new("dist-*-orders*");
        assert!(filter.matches("dist-x-orders"));
        assert!(filter.matches("dist-anything"));
        assert!(!filter.matches("repl-x-orders"));
    }

    #[test]
    fn test_pattern_without_wildcard_is_exact() {
        let filter = CacheNameFilter::new("dist-me");
        assert!(filter.matches("dist-me"));
        assert!(!filter.matches("dist-me2"));
    }

    #[test]
    fn test_cache_name_filter_ignores_non_cache_events() {
        let filter = CacheNameFilter::new("*");
        assert!(!filter.evaluate(&Ping));
    }

    #[test]
    fn test_event_type_filter() {
        let filter = EventTypeFilter::<Ping>::new();
        assert!(filter.evaluate(&Ping));
        assert!(!filter.evaluate(&Step(Phase::Commenced)));
        assert!(!filter.evaluate(&*cache_event("dist-me")));
    }

    #[test]
    fn test_phase_filter() {
        let filter = PhaseFilter::new(Phase::Aborted);
        assert!(filter.evaluate(&Step(Phase::Aborted)));
        assert!(!filter.evaluate(&Step(Phase::Completed)));
        assert!(!filter.evaluate(&Ping));
    }

    #[test]
    fn test_all_of() {
        let filter = AllOf::new([
            FilterKey::new(EventTypeFilter::<Step>::new()),
            FilterKey::new(PhaseFilter::new(Phase::Completed)),
        ]);
        assert!(filter.evaluate(&Step(Phase::Completed)));
        assert!(!filter.evaluate(&Step(Phase::Commenced)));
        assert!(!filter.evaluate(&Ping));
    }

    #[test]
    fn test_filter_key_equality_by_value() {
        let a = FilterKey::new(CacheNameFilter::new("dist-*"));
        let b = FilterKey::new(CacheNameFilter::new("dist-*"));
        let c = FilterKey::new(CacheNameFilter::new("repl-*"));

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn test_filter_key_distinguishes_types() {
        let all = FilterKey::new(MatchAll);
        let typed = FilterKey::new(EventTypeFilter::<Ping>::new());
        let other_typed = FilterKey::new(EventTypeFilter::<Step>::new());

        assert_ne!(all, typed);
        assert_ne!(typed, other_typed);
        assert_eq!(typed, FilterKey::new(EventTypeFilter::<Ping>::new()));
    }

    #[test]
    fn test_filter_key_downcast() {
        let key = FilterKey::from(CacheNameFilter::new("dist-*"));
        assert_eq!(key.downcast_ref::<CacheNameFilter>().unwrap().pattern(), "dist-*");
        assert!(key.downcast_ref::<MatchAll>().is_none());
    }
}
