//! Key-value resource lookup.
//!
//! The hosting environment hands shared resources (the task executor, the
//! dispatcher bound to a context) to the core through a [`ResourceRegistry`].
//! Resources are keyed by type and an optional name; lookup either returns the
//! resource or `None`.
//!
//! Trait objects are registered under their `dyn` type:
//!
//! ```ignore
//! let registry = ResourceRegistry::new();
//! let executor: Arc<dyn TaskExecutor> = Arc::new(TokioExecutor::current().unwrap());
//! registry.register::<dyn TaskExecutor>(executor);
//!
//! let found = registry.get::<dyn TaskExecutor>();
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResourceKey {
    type_id: TypeId,
    name: Option<String>,
}

impl ResourceKey {
    fn of<T: ?Sized + 'static>(name: Option<&str>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: name.map(str::to_owned),
        }
    }
}

/// Thread-safe registry of shared resources keyed by type and optional name.
#[derive(Default)]
pub struct ResourceRegistry {
    // Each value is an `Arc<T>` boxed as `Any`, so unsized `T` works too.
    resources: DashMap<ResourceKey, Box<dyn Any + Send + Sync>>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
        }
    }

    /// Register the unnamed resource of type `T`, returning the one it replaced.
    pub fn register<T>(&self, resource: Arc<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(ResourceKey::of::<T>(None), resource)
    }

    /// Register a named resource of type `T`, returning the one it replaced.
    pub fn register_named<T>(&self, name: &str, resource: Arc<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(ResourceKey::of::<T>(Some(name)), resource)
    }

    /// Look up the unnamed resource of type `T`.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup(&ResourceKey::of::<T>(None))
    }

    /// Look up a named resource of type `T`.
    pub fn get_named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup(&ResourceKey::of::<T>(Some(name)))
    }

    /// Remove the unnamed resource of type `T`.
    pub fn unregister<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.take(&ResourceKey::of::<T>(None))
    }

    /// Remove a named resource of type `T`.
    pub fn unregister_named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.take(&ResourceKey::of::<T>(Some(name)))
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn insert<T>(&self, key: ResourceKey, resource: Arc<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resources
            .insert(key, Box::new(resource))
            .and_then(|previous| previous.downcast::<Arc<T>>().ok())
            .map(|previous| *previous)
    }

    fn lookup<T>(&self, key: &ResourceKey) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resources
            .get(key)
            .and_then(|entry| entry.value().downcast_ref::<Arc<T>>().cloned())
    }

    fn take<T>(&self, key: &ResourceKey) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resources
            .remove(key)
            .and_then(|(_, resource)| resource.downcast::<Arc<T>>().ok())
            .map(|resource| *resource)
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resource_count", &self.resources.len())
            .finish()
    }
}
