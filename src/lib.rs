//! swr-resource - Reactive stale-while-revalidate resources for Rust
//!
//! This library binds a key-addressable async cache to reactive state:
//! - A reactive key, recomputed whenever its declared dependencies change
//! - Value, error and refetching cells kept in sync with cache events
//! - Refetch on window focus (throttled) and on network reconnect
//! - Staleness and focus-availability trackers
//! - Layered options: call site, shared context, library defaults
//!
//! # Example
//!
//! ```ignore
//! use swr_resource::{KeyResolver, MemoryEngine, MemoryEngineConfig, Resource, ResourceOptions};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(MemoryEngine::new(MemoryEngineConfig::default(), |key| async move {
//!         // Load from the origin - `key` is "user:1", then "user:2"
//!         Ok(format!("profile for {}", key))
//!     }));
//!
//!     let (user, user_rx) = watch::channel(Some("user:1".to_string()));
//!     let profile = Resource::builder(KeyResolver::watch(user_rx))
//!         .options(ResourceOptions::new().engine(engine))
//!         .build()?;
//!
//!     let mut value = profile.watch_value();
//!     value.changed().await?;
//!
//!     // Switching the key tears down the old subscriptions first
//!     user.send_replace(Some("user:2".to_string()));
//!     Ok(())
//! }
//! ```

mod builder;
mod clock;
mod context;
mod engine;
pub mod engines;
mod entry;
mod environment;
mod error;
mod facade;
mod host;
mod key;
mod listeners;
mod options;
mod resource;
mod subscription;
mod tracker;
mod utils;

// Re-export public API
pub use builder::ResourceBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ResourceContext, clear_context, provide_context, use_context};
pub use engine::{CacheEngine, CacheEvent, EventCallback, EventKind, Mutation, QueryOptions};
pub use engines::{Fetcher, MemoryEngine, MemoryEngineConfig};
pub use entry::Entry;
pub use environment::{
    Beacon, Environment, FocusGate, SignalHandler, SignalSource, on_connect, on_focus,
};
pub use error::{CacheError, KeyError, ResourceError};
pub use facade::CacheFacade;
pub use host::{Host, Scope, Teardown};
pub use key::KeyResolver;
pub use listeners::{Listener, Listeners};
pub use options::{
    DEFAULT_CLEAR_ON_FORGET, DEFAULT_FOCUS_INTERVAL, DEFAULT_REFETCH_ON_CONNECT,
    DEFAULT_REFETCH_ON_FOCUS, ResourceConfig, ResourceOptions, Settings,
};
pub use resource::{Resource, ResourceState};
pub use subscription::{Subscription, SubscriptionSet};
pub use tracker::{FocusAvailability, FocusTracker, StaleTracker, Staleness};
