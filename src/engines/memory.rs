use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{AbortHandle, Abortable, Aborted, BoxFuture, Shared};
use moka::sync::Cache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::engine::{CacheEngine, CacheEvent, EventCallback, EventKind, Mutation, QueryOptions};
use crate::entry::Entry;
use crate::error::CacheError;
use crate::listeners::Listeners;
use crate::subscription::Subscription;
use crate::utils::{build_event_key, lock, millis};

/// Loads the value for a key from its origin.
pub type Fetcher<V> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<V, CacheError>> + Send + Sync>;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// Configuration for MemoryEngine.
#[derive(Debug, Clone)]
pub struct MemoryEngineConfig {
    /// Maximum number of entries the engine keeps.
    pub max_capacity: u64,

    /// Default lifetime of a fetched or mutated value.
    /// Individual queries may override it through `QueryOptions::expiration`.
    pub expiration: Duration,
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        MemoryEngineConfig {
            max_capacity: 10_000,
            expiration: Duration::from_millis(2_000),
        }
    }
}

struct InFlight<V> {
    id: u64,
    fetch: SharedFetch<V>,
    abort: AbortHandle,
    reason: Arc<Mutex<Option<String>>>,
}

struct EngineInner<V> {
    items: Cache<String, Entry<V>>,
    fetcher: Fetcher<V>,
    expiration: Duration,
    clock: Arc<dyn Clock>,
    events: Mutex<HashMap<String, Listeners<CacheEvent<V>>>>,
    inflight: Mutex<HashMap<String, InFlight<V>>>,
    next_fetch_id: AtomicU64,
}

/// In-memory cache engine backed by Moka.
///
/// MemoryEngine provides:
/// - Bounded storage with automatic eviction
/// - Stale-while-revalidate reads
/// - Deduplication of concurrent fetches for the same key
/// - Per-key lifecycle events (`mutated`, `refetching`, `resolved`, `error`, `forgotten`)
///
/// Every fetch runs on its own task, so dropping a pending `query` never leaves a
/// key stuck in flight.
pub struct MemoryEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<EngineInner<V>>,
}

impl<V> Clone for MemoryEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        MemoryEngine {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> MemoryEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new MemoryEngine using the system clock.
    ///
    /// # Example
    /// ```ignore
    /// let engine = MemoryEngine::new(MemoryEngineConfig::default(), |key| async move {
    ///     db.get_user(&key).await.map_err(|e| CacheError::fetch(key, e.to_string()))
    /// });
    /// ```
    pub fn new<F, Fut>(config: MemoryEngineConfig, fetcher: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        Self::with_clock(config, Arc::new(SystemClock), fetcher)
    }

    /// Create a new MemoryEngine reading time from `clock`.
    pub fn with_clock<F, Fut>(config: MemoryEngineConfig, clock: Arc<dyn Clock>, fetcher: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let fetcher: Fetcher<V> = Arc::new(move |key| fetcher(key).boxed());
        MemoryEngine {
            inner: Arc::new(EngineInner {
                items: Cache::builder().max_capacity(config.max_capacity).build(),
                fetcher,
                expiration: config.expiration,
                clock,
                events: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
            }),
        }
    }

    /// Whether a fetch for `key` is currently outstanding.
    pub fn is_fetching(&self, key: &str) -> bool {
        lock(&self.inner.inflight).contains_key(key)
    }

    /// Return the cached value without fetching, fresh or not.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.inner.items.get(key).map(|entry| entry.value)
    }

    /// Start a fetch for `key`, or join the one already in flight.
    fn fetch(&self, key: &str, options: &QueryOptions) -> SharedFetch<V> {
        let mut inflight = lock(&self.inner.inflight);
        if let Some(existing) = inflight.get(key) {
            tracing::trace!(key = %key, "joining in-flight fetch");
            return existing.fetch.clone();
        }

        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let (abort, registration) = AbortHandle::new_pair();
        let reason = Arc::new(Mutex::new(None));
        let expiration = options.expiration.unwrap_or(self.inner.expiration);
        let remove_on_error = options.remove_on_error.unwrap_or(false);

        let pending = (self.inner.fetcher)(key.to_string());
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let abort_reason = Arc::clone(&reason);
        let fetch = async move {
            let result = match Abortable::new(pending, registration).await {
                Ok(result) => result,
                Err(Aborted) => Err(CacheError::aborted(
                    owned_key.clone(),
                    lock(&abort_reason).take(),
                )),
            };
            inner.settle(&owned_key, id, &result, expiration, remove_on_error);
            result
        }
        .boxed()
        .shared();

        inflight.insert(
            key.to_string(),
            InFlight {
                id,
                fetch: fetch.clone(),
                abort,
                reason,
            },
        );
        drop(inflight);

        if self.inner.items.contains_key(key) {
            self.inner.emit(key, &CacheEvent::Refetching);
        }

        tokio::spawn(fetch.clone());
        fetch
    }
}

impl<V> EngineInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn emit(&self, key: &str, event: &CacheEvent<V>) {
        let listeners = lock(&self.events)
            .get(&build_event_key(key, &event.kind()))
            .cloned();
        if let Some(listeners) = listeners {
            listeners.emit(event);
        }
    }

    fn store(&self, key: &str, value: V, expiration: Duration) {
        let expires_at = self.clock.now_ms().saturating_add(millis(expiration));
        self.items
            .insert(key.to_string(), Entry::new(value, expires_at));
    }

    fn settle(
        &self,
        key: &str,
        id: u64,
        result: &Result<V, CacheError>,
        expiration: Duration,
        remove_on_error: bool,
    ) {
        {
            let mut inflight = lock(&self.inflight);
            if inflight.get(key).is_some_and(|fetch| fetch.id == id) {
                inflight.remove(key);
            }
        }

        match result {
            Ok(value) => {
                self.store(key, value.clone(), expiration);
                tracing::debug!(key = %key, "fetch resolved");
                self.emit(key, &CacheEvent::Resolved(value.clone()));
            }
            Err(error) => {
                if remove_on_error {
                    self.items.invalidate(key);
                }
                tracing::debug!(key = %key, error = %error, "fetch failed");
                self.emit(key, &CacheEvent::Error(error.clone()));
            }
        }
    }
}

#[async_trait]
impl<V> CacheEngine<V> for MemoryEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn query(&self, key: &str, options: &QueryOptions) -> Result<V, CacheError> {
        // `stale: false` and `fresh: true` both force the origin
        let cached = options.is_stale() && !options.is_fresh();
        if cached {
            if let Some(entry) = self.inner.items.get(key) {
                // Entry is fresh
                if entry.is_fresh(self.inner.clock.now_ms()) {
                    return Ok(entry.value);
                }

                // Entry is stale, serve it and revalidate in background
                let _ = self.fetch(key, options);
                return Ok(entry.value);
            }
        }

        self.fetch(key, options).await
    }

    fn mutate(&self, key: &str, mutation: Mutation<V>) {
        let previous = self.inner.items.get(key).map(|entry| entry.value);
        let value = mutation.apply(previous.as_ref());
        self.inner.store(key, value.clone(), self.inner.expiration);
        self.inner.emit(key, &CacheEvent::Mutated(value));
    }

    fn subscribe(&self, key: &str, kind: EventKind, callback: EventCallback<V>) -> Subscription {
        let event_key = build_event_key(key, &kind);
        // Added under the map lock so a concurrent teardown cannot drop the
        // entry between lookup and registration.
        let listener = lock(&self.inner.events)
            .entry(event_key.clone())
            .or_default()
            .add(callback);

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            drop(listener);
            if let Some(inner) = inner.upgrade() {
                let mut events = lock(&inner.events);
                if events.get(&event_key).is_some_and(Listeners::is_empty) {
                    events.remove(&event_key);
                }
            }
        })
    }

    fn forget(&self, key: &str) {
        self.inner.items.invalidate(key);
        self.inner.emit(key, &CacheEvent::Forgotten);
    }

    fn abort(&self, key: &str, reason: Option<&str>) {
        let inflight = lock(&self.inner.inflight);
        if let Some(fetch) = inflight.get(key) {
            *lock(&fetch.reason) = reason.map(str::to_string);
            fetch.abort.abort();
            tracing::debug!(key = %key, "fetch aborted");
        }
    }

    fn expiration(&self, key: &str) -> Option<i64> {
        self.inner.items.get(key).map(|entry| entry.expires_at)
    }
}
