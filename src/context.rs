//! Shared options context.
//!
//! Hosts hand a [`ResourceContext`] to each resource explicitly. Hosts with no
//! way to thread it through can register one per value type in the
//! process-scoped registry instead; resources built without an explicit context
//! read it from there.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

use crate::options::ResourceOptions;

/// Options shared by every resource of one subtree or process.
pub type ResourceContext<V> = ResourceOptions<V>;

type Registry = RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>;

static REGISTRY: LazyLock<Registry> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register the process-wide context for resources of value type `V`,
/// replacing any previous one.
pub fn provide_context<V: 'static>(context: ResourceContext<V>) {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(TypeId::of::<V>(), Box::new(context));
}

/// The process-wide context for value type `V`, if one was provided.
pub fn use_context<V: 'static>() -> Option<ResourceContext<V>> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&TypeId::of::<V>())
        .and_then(|context| context.downcast_ref::<ResourceContext<V>>())
        .cloned()
}

/// Remove the process-wide context for value type `V`.
pub fn clear_context<V: 'static>() -> Option<ResourceContext<V>> {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&TypeId::of::<V>())
        .and_then(|context| context.downcast::<ResourceContext<V>>().ok())
        .map(|context| *context)
}
