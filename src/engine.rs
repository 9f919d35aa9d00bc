use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::subscription::Subscription;

/// A cache engine owns key-addressed entries, fetches them, and raises lifecycle
/// events for each key.
///
/// Retry, deduplication and eviction policy all live behind this trait; the
/// resource binder only relies on the contract below.
///
/// Engines must raise [`CacheEvent::Error`] for every failed fetch: resources
/// learn about failures through events only.
#[async_trait]
pub trait CacheEngine<V>: Send + Sync {
    /// A name for tracing.
    ///
    /// # Example
    /// - "memory"
    fn name(&self) -> &'static str;

    /// Resolve the value for `key`.
    ///
    /// With `options.stale` the engine may answer with an expired value and
    /// revalidate in the background; without it the caller waits for a fetch.
    async fn query(&self, key: &str, options: &QueryOptions) -> Result<V, CacheError>;

    /// Synchronously write the local value for `key` and raise `mutated`.
    fn mutate(&self, key: &str, mutation: Mutation<V>);

    /// Listen to one kind of event for `key`.
    fn subscribe(&self, key: &str, kind: EventKind, callback: EventCallback<V>) -> Subscription;

    /// Evict `key` and raise `forgotten`.
    fn forget(&self, key: &str);

    /// Cancel any in-flight fetch for `key`.
    fn abort(&self, key: &str, reason: Option<&str>);

    /// Unix millisecond timestamp at which the entry for `key` expires.
    ///
    /// The response must be `None` when nothing is cached.
    fn expiration(&self, key: &str) -> Option<i64>;
}

/// Callback registered through [`CacheEngine::subscribe`].
pub type EventCallback<V> = Arc<dyn Fn(&CacheEvent<V>) + Send + Sync>;

/// The fixed set of lifecycle events an engine raises per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Mutated,
    Refetching,
    Resolved,
    Error,
    Forgotten,
}

impl EventKind {
    /// Every event kind, in the order resources subscribe to them.
    pub const ALL: [EventKind; 5] = [
        EventKind::Mutated,
        EventKind::Refetching,
        EventKind::Resolved,
        EventKind::Error,
        EventKind::Forgotten,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Mutated => "mutated",
            EventKind::Refetching => "refetching",
            EventKind::Resolved => "resolved",
            EventKind::Error => "error",
            EventKind::Forgotten => "forgotten",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event raised by an engine, with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent<V> {
    Mutated(V),
    Refetching,
    Resolved(V),
    Error(CacheError),
    Forgotten,
}

impl<V> CacheEvent<V> {
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Mutated(_) => EventKind::Mutated,
            CacheEvent::Refetching => EventKind::Refetching,
            CacheEvent::Resolved(_) => EventKind::Resolved,
            CacheEvent::Error(_) => EventKind::Error,
            CacheEvent::Forgotten => EventKind::Forgotten,
        }
    }
}

/// A local write: either a replacement value or an updater over the
/// previous value.
pub enum Mutation<V> {
    Value(V),
    Update(Box<dyn FnOnce(Option<&V>) -> V + Send>),
}

impl<V> Mutation<V> {
    /// Build an updater mutation.
    pub fn update(f: impl FnOnce(Option<&V>) -> V + Send + 'static) -> Self {
        Mutation::Update(Box::new(f))
    }

    /// Produce the value to store given the previous one.
    pub fn apply(self, previous: Option<&V>) -> V {
        match self {
            Mutation::Value(value) => value,
            Mutation::Update(f) => f(previous),
        }
    }
}

impl<V> From<V> for Mutation<V> {
    fn from(value: V) -> Self {
        Mutation::Value(value)
    }
}

impl<V: fmt::Debug> fmt::Debug for Mutation<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Mutation::Update(_) => f.write_str("Update(..)"),
        }
    }
}

/// Fetch options understood by engines.
///
/// Every field is optional so layers can be merged with [`merge_over`](Self::merge_over);
/// an unset field means "engine default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Accept an expired cached value and revalidate in the background.
    pub stale: Option<bool>,
    /// Skip the cache and always fetch.
    pub fresh: Option<bool>,
    /// Lifetime of the value stored by this fetch.
    #[serde(with = "crate::utils::serde_millis")]
    pub expiration: Option<Duration>,
    /// Forget the cached value when the fetch fails.
    pub remove_on_error: Option<bool>,
    /// Engine-specific fields passed through unmodified.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl QueryOptions {
    /// Options with only `stale` set.
    pub fn stale(stale: bool) -> Self {
        QueryOptions {
            stale: Some(stale),
            ..Default::default()
        }
    }

    /// Options with only `fresh` set.
    pub fn fresh(fresh: bool) -> Self {
        QueryOptions {
            fresh: Some(fresh),
            ..Default::default()
        }
    }

    /// Layer `self` over `base`: set fields in `self` win, extras are unioned.
    pub fn merge_over(&self, base: &QueryOptions) -> QueryOptions {
        let mut extra = base.extra.clone();
        extra.extend(self.extra.clone());
        QueryOptions {
            stale: self.stale.or(base.stale),
            fresh: self.fresh.or(base.fresh),
            expiration: self.expiration.or(base.expiration),
            remove_on_error: self.remove_on_error.or(base.remove_on_error),
            extra,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale.unwrap_or(true)
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh.unwrap_or(false)
    }

    /// Read an engine-specific passthrough field.
    pub fn extra_as<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, CacheError> {
        self.extra
            .get(field)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    CacheError::Serialization(format!("option '{}': {}", field, e))
                })
            })
            .transpose()
    }
}
