//! Cache entry events.
//!
//! Entry events decorate a [`CacheEvent`] with the affected key/value
//! [`Entry`]. The dispatcher never inspects the entry; it is forwarded to
//! handlers as-is.

use std::fmt;

use crate::core::{CacheEvent, Event};

/// An opaque key/value pair as seen by the cache runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    key: K,
    value: Option<V>,
}

impl<K, V> Entry<K, V> {
    /// An entry holding a value.
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value: Some(value),
        }
    }

    /// An entry whose value is absent (e.g. after removal).
    pub fn absent(key: K) -> Self {
        Self { key, value: None }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Returns true if the entry holds a value.
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// A cache event that refers to a single entry.
pub trait EntryEvent<K, V>: CacheEvent {
    /// The affected entry.
    fn entry(&self) -> &Entry<K, V>;
}

macro_rules! entry_event {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name<K, V> {
            cache_name: String,
            entry: Entry<K, V>,
        }

        impl<K, V> $name<K, V> {
            pub fn new(cache_name: impl Into<String>, entry: Entry<K, V>) -> Self {
                Self {
                    cache_name: cache_name.into(),
                    entry,
                }
            }
        }

        impl<K, V> fmt::Debug for $name<K, V>
        where
            K: fmt::Debug,
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("cache_name", &self.cache_name)
                    .field("key", self.entry.key())
                    .finish_non_exhaustive()
            }
        }

        impl<K, V> Event for $name<K, V>
        where
            K: fmt::Debug + Send + Sync + 'static,
            V: Send + Sync + 'static,
        {
            fn event_name(&self) -> &'static str {
                $label
            }

            fn as_cache_event(&self) -> Option<&dyn CacheEvent> {
                Some(self)
            }
        }

        impl<K, V> CacheEvent for $name<K, V>
        where
            K: fmt::Debug + Send + Sync + 'static,
            V: Send + Sync + 'static,
        {
            fn cache_name(&self) -> &str {
                &self.cache_name
            }
        }

        impl<K, V> EntryEvent<K, V> for $name<K, V>
        where
            K: fmt::Debug + Send + Sync + 'static,
            V: Send + Sync + 'static,
        {
            fn entry(&self) -> &Entry<K, V> {
                &self.entry
            }
        }
    };
}

entry_event!(
    /// An entry was inserted into a cache.
    EntryInsertedEvent,
    "EntryInserted"
);

entry_event!(
    /// An entry was removed from a cache. The entry carries the removed value, if known.
    EntryRemovedEvent,
    "EntryRemoved"
);

/// An entry in a cache was updated; carries the value it replaced.
#[derive(Clone)]
pub struct EntryUpdatedEvent<K, V> {
    cache_name: String,
    entry: Entry<K, V>,
    original_value: Option<V>,
}

impl<K, V> EntryUpdatedEvent<K, V> {
    pub fn new(cache_name: impl Into<String>, entry: Entry<K, V>, original_value: Option<V>) -> Self {
        Self {
            cache_name: cache_name.into(),
            entry,
            original_value,
        }
    }

    /// The value before the update, if known.
    pub fn original_value(&self) -> Option<&V> {
        self.original_value.as_ref()
    }
}

impl<K: fmt::Debug, V> fmt::Debug for EntryUpdatedEvent<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryUpdatedEvent")
            .field("cache_name", &self.cache_name)
            .field("key", self.entry.key())
            .finish_non_exhaustive()
    }
}

impl<K, V> Event for EntryUpdatedEvent<K, V>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn event_name(&self) -> &'static str {
        "EntryUpdated"
    }

    fn as_cache_event(&self) -> Option<&dyn CacheEvent> {
        Some(self)
    }
}

impl<K, V> CacheEvent for EntryUpdatedEvent<K, V>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn cache_name(&self) -> &str {
        &self.cache_name
    }
}

impl<K, V> EntryEvent<K, V> for EntryUpdatedEvent<K, V>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn entry(&self) -> &Entry<K, V> {
        &self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SharedEvent;
    use std::sync::Arc;

    #[test]
    fn test_entry_event_exposes_cache_name_and_entry() {
        let event = EntryInsertedEvent::new("dist-orders", Entry::new("k1".to_string(), 10u32));

        assert_eq!(event.cache_name(), "dist-orders");
        assert_eq!(event.entry().key(), "k1");
        assert_eq!(event.entry().value(), Some(&10));
    }

    #[test]
    fn test_updated_event_carries_original_value() {
        let event = EntryUpdatedEvent::new("dist-orders", Entry::new(1u64, "new"), Some("old"));

        assert_eq!(event.entry().value(), Some(&"new"));
        assert_eq!(event.original_value(), Some(&"old"));
    }

    #[test]
    fn test_entry_event_through_shared_event() {
        let event: SharedEvent = Arc::new(EntryRemovedEvent::new(
            "repl-sessions",
            Entry::<u64, String>::absent(42),
        ));

        assert_eq!(event.as_cache_event().unwrap().cache_name(), "repl-sessions");
        assert_eq!(event.event_name(), "EntryRemoved");

        let removed = event.downcast_ref::<EntryRemovedEvent<u64, String>>().unwrap();
        assert!(!removed.entry().is_present());
        assert_eq!(*removed.entry().key(), 42);
    }

    #[test]
    fn test_debug_omits_values() {
        let event = EntryUpdatedEvent::new("c", Entry::new("key", "secret"), None);
        let debug = format!("{:?}", event);
        assert!(debug.contains("key"));
        assert!(!debug.contains("secret"));
    }
}
