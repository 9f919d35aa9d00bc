//! The resource binder: one cache key, bound to reactive output cells.
//!
//! # Invariants
//!
//! 1. At most one subscription set is live. The set for the previous key is
//!    fully disposed before any subscription for the next key is created.
//! 2. `is_refetching` is reset on every key change and is never true while the
//!    key is absent.
//! 3. Results and events belonging to a superseded key never reach the cells:
//!    every callback and every pending query carries the generation of the
//!    transition that created it and is ignored once that generation is stale.
//! 4. Every `error` event is delivered to the error boundary exactly once.

use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::builder::ResourceBuilder;
use crate::clock::Clock;
use crate::engine::{CacheEvent, EventCallback, EventKind, Mutation, QueryOptions};
use crate::environment::{self, Environment, FocusGate, SignalHandler};
use crate::error::{CacheError, ResourceError};
use crate::facade::CacheFacade;
use crate::host::Host;
use crate::key::{self, KeyProducer, KeyResolver};
use crate::options::Settings;
use crate::subscription::SubscriptionSet;
use crate::tracker::{FocusTracker, StaleTracker};
use crate::utils::lock;

/// Where surfaced errors go.
enum Boundary {
    Host(Arc<dyn Host>),
    Stream(mpsc::UnboundedSender<CacheError>),
}

/// Observable phase of a resource, derived from its cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// No key.
    Idle,
    /// Key present, no value yet.
    Loading,
    /// Key present, value set.
    Ready,
    /// Key present, value set, background refetch outstanding.
    Refetching,
    /// Key present, error set. Stays until the key changes or the error is cleared.
    Error,
}

pub(crate) struct ResourceInner<V> {
    producer: KeyProducer,
    facade: CacheFacade<V>,
    settings: Settings,
    environment: Environment,
    clock: Arc<dyn Clock>,
    focus: FocusGate,
    runtime: Handle,

    key: watch::Sender<Option<String>>,
    value: watch::Sender<Option<V>>,
    error: watch::Sender<Option<CacheError>>,
    refetching: watch::Sender<bool>,

    /// Bumped on every transition and on disposal.
    generation: AtomicU64,
    /// Held while a generation is checked and its write applied, and while
    /// the generation moves on.
    commit: Mutex<()>,
    /// The live subscription set. Its lock also serialises key transitions.
    subscriptions: Mutex<SubscriptionSet>,
    boundary: Boundary,
    errors: Mutex<Option<mpsc::UnboundedReceiver<CacheError>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl<V> ResourceInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn current_key(&self) -> Option<String> {
        self.key.borrow().clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Start a new generation once in-progress writes of the old one finish.
    fn advance_generation(&self) -> u64 {
        let _writes = lock(&self.commit);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply `write` only if `generation` is still current, atomically with
    /// respect to [`advance_generation`](Self::advance_generation).
    fn commit(&self, generation: u64, write: impl FnOnce()) -> bool {
        let _writes = lock(&self.commit);
        if !self.is_current(generation) {
            return false;
        }
        write();
        true
    }

    /// Re-run the key producer and transition if the key changed.
    fn recompute(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        // The producer runs outside the transition lock so it may read the
        // resource without deadlocking.
        let next = key::resolve_key(&self.producer);

        let mut subscriptions = lock(&self.subscriptions);
        if self.disposed.load(Ordering::SeqCst) || *self.key.borrow() == next {
            return;
        }
        self.transition(&mut subscriptions, next);
    }

    fn transition(self: &Arc<Self>, subscriptions: &mut SubscriptionSet, next: Option<String>) {
        let generation = self.advance_generation();

        subscriptions.dispose();
        self.refetching.send_replace(false);
        self.key.send_replace(next.clone());

        let Some(key) = next else {
            tracing::debug!(generation, "resource key cleared");
            return;
        };
        tracing::debug!(key = %key, generation, "resource key changed");
        self.error.send_replace(None);

        let handler = self.event_handler(generation);
        for kind in EventKind::ALL {
            subscriptions.push(self.facade.subscribe(&key, kind, handler.clone()));
        }

        let refetch = self.trigger_refetch(generation, key.clone());
        subscriptions.push(environment::on_focus(
            self.environment.focus.as_ref(),
            self.settings.refetch_on_focus,
            self.focus.clone(),
            refetch.clone(),
        ));
        subscriptions.push(environment::on_connect(
            self.environment.online.as_ref(),
            self.settings.refetch_on_connect,
            refetch,
        ));

        self.resolve(key, generation);
    }

    /// Stale-accepting query for `key`, applied only while `generation` is current.
    fn resolve(self: &Arc<Self>, key: String, generation: u64) {
        let weak = Arc::downgrade(self);
        let facade = self.facade.clone();
        self.runtime.spawn(async move {
            let result = facade.query(&key, &QueryOptions::stale(true)).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(value) => {
                    let applied = inner.commit(generation, || {
                        inner.value.send_replace(Some(value));
                    });
                    if !applied {
                        tracing::trace!(key = %key, "dropping result for superseded key");
                    }
                }
                // Failures arrive through the `error` event.
                Err(error) => {
                    tracing::debug!(key = %key, error = %error, "initial resolution failed");
                }
            }
        });
    }

    fn event_handler(self: &Arc<Self>, generation: u64) -> EventCallback<V> {
        let weak = Arc::downgrade(self);
        Arc::new(move |event: &CacheEvent<V>| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(generation, event);
            }
        })
    }

    fn on_event(&self, generation: u64, event: &CacheEvent<V>) {
        let mut raised = None;
        self.commit(generation, || match event {
            CacheEvent::Mutated(value) => {
                self.value.send_replace(Some(value.clone()));
            }
            CacheEvent::Refetching => {
                self.refetching.send_replace(true);
            }
            CacheEvent::Resolved(value) => {
                self.refetching.send_replace(false);
                self.value.send_replace(Some(value.clone()));
            }
            CacheEvent::Error(error) => {
                self.refetching.send_replace(false);
                self.error.send_replace(Some(error.clone()));
                raised = Some(error.clone());
            }
            CacheEvent::Forgotten => {
                if self.settings.clear_on_forget {
                    self.value.send_replace(None);
                }
            }
        });

        // Outside the commit lock: a host may dispose the resource from `on_error`.
        if let Some(error) = raised {
            self.throw(error);
        }
    }

    fn throw(&self, error: CacheError) {
        match &self.boundary {
            Boundary::Host(host) => host.on_error(error),
            Boundary::Stream(errors) => {
                // Untaken streams do not buffer; the error slot still holds it.
                if lock(&self.errors).is_some() {
                    tracing::debug!(error = %error, "error stream not taken, error kept in slot only");
                    return;
                }
                // A dropped receiver is fine for the same reason.
                let _ = errors.send(error);
            }
        }
    }

    /// Handler for environment triggers: a background refetch of `key`, the
    /// key of `generation`, skipped once that generation is superseded.
    fn trigger_refetch(self: &Arc<Self>, generation: u64, key: String) -> SignalHandler {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(generation) {
                return;
            }
            let key = key.clone();
            let runtime = inner.runtime.clone();
            runtime.spawn(async move {
                // The key may have moved on before this task got to run.
                if !inner.is_current(generation) {
                    tracing::trace!(key = %key, "skipping triggered refetch for superseded key");
                    return;
                }
                if let Err(error) = inner.refetch_key(&key, &QueryOptions::default()).await {
                    tracing::debug!(key = %key, error = %error, "triggered refetch failed");
                }
            });
        })
    }

    async fn refetch(&self, options: &QueryOptions) -> Result<Option<V>, ResourceError> {
        let Some(key) = self.current_key() else {
            return Ok(None);
        };
        self.refetch_key(&key, options).await.map(Some)
    }

    /// Non-stale query for `key`, so the engine goes to the origin.
    async fn refetch_key(&self, key: &str, options: &QueryOptions) -> Result<V, ResourceError> {
        let options = QueryOptions {
            stale: Some(false),
            ..options.clone()
        };
        Ok(self.facade.query(key, &options).await?)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(driver) = lock(&self.driver).take() {
            driver.abort();
        }

        let mut subscriptions = lock(&self.subscriptions);
        self.advance_generation();
        subscriptions.dispose();
        self.refetching.send_replace(false);
        tracing::debug!("resource disposed");
    }
}

/// Re-run key resolution for every dependency change until disposed.
async fn drive<V>(resource: Weak<ResourceInner<V>>, mut changes: BoxStream<'static, ()>)
where
    V: Clone + Send + Sync + 'static,
{
    while changes.next().await.is_some() {
        let Some(inner) = resource.upgrade() else {
            break;
        };
        inner.recompute();
    }
}

/// A cache entry bound to reactive cells for as long as the resource lives.
///
/// The resource follows its [`KeyResolver`]: every time the key changes it
/// drops the previous key's event subscriptions, subscribes to the new key,
/// and resolves the new key's value (stale values are accepted). Cache events
/// keep the cells in sync afterwards.
///
/// Dropping the resource disposes it.
///
/// # Example
/// ```ignore
/// let engine = Arc::new(MemoryEngine::new(MemoryEngineConfig::default(), fetch_user));
/// let user = Resource::builder(KeyResolver::fixed("user:1"))
///     .options(ResourceOptions::new().engine(engine))
///     .build()?;
///
/// let mut value = user.watch_value();
/// value.changed().await?;
/// ```
pub struct Resource<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<ResourceInner<V>>,
}

impl<V> Resource<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start building a resource for the keys produced by `key`.
    pub fn builder(key: KeyResolver) -> ResourceBuilder<V> {
        ResourceBuilder::new(key)
    }

    /// Wire up a resource and perform the initial key resolution.
    pub(crate) fn start(
        key: KeyResolver,
        facade: CacheFacade<V>,
        settings: Settings,
        environment: Environment,
        clock: Arc<dyn Clock>,
        host: Option<Arc<dyn Host>>,
    ) -> Result<Self, ResourceError> {
        let runtime = Handle::try_current().map_err(|_| ResourceError::NoRuntime)?;
        let (producer, changes) = key.into_parts();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (boundary, errors) = match &host {
            Some(host) => (Boundary::Host(Arc::clone(host)), None),
            None => (Boundary::Stream(errors_tx), Some(errors_rx)),
        };
        let focus = FocusGate::new(Arc::clone(&clock), settings.focus_interval);

        let inner = Arc::new(ResourceInner {
            producer,
            facade,
            settings,
            environment,
            clock,
            focus,
            runtime,
            key: watch::Sender::new(None),
            value: watch::Sender::new(None),
            error: watch::Sender::new(None),
            refetching: watch::Sender::new(false),
            generation: AtomicU64::new(0),
            commit: Mutex::new(()),
            subscriptions: Mutex::new(SubscriptionSet::new()),
            boundary,
            errors: Mutex::new(errors),
            driver: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        if let Some(host) = host {
            let weak = Arc::downgrade(&inner);
            host.on_teardown(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.dispose();
                }
            }));
        }

        inner.recompute();
        let driver = inner
            .runtime
            .spawn(drive(Arc::downgrade(&inner), changes));
        *lock(&inner.driver) = Some(driver);

        Ok(Resource { inner })
    }

    /// The current key, `None` when the producer yields no key.
    pub fn key(&self) -> Option<String> {
        self.inner.current_key()
    }

    /// The latest value for the current key.
    pub fn value(&self) -> Option<V> {
        self.inner.value.borrow().clone()
    }

    /// The last error surfaced for the current key.
    pub fn error(&self) -> Option<CacheError> {
        self.inner.error.borrow().clone()
    }

    /// Whether a background refetch is outstanding for the current key.
    pub fn is_refetching(&self) -> bool {
        *self.inner.refetching.borrow()
    }

    /// Timestamp of the last focus-triggered refetch.
    pub fn last_focus(&self) -> i64 {
        self.inner.focus.last_focus()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn facade(&self) -> &CacheFacade<V> {
        &self.inner.facade
    }

    pub fn state(&self) -> ResourceState {
        if self.key().is_none() {
            ResourceState::Idle
        } else if self.inner.error.borrow().is_some() {
            ResourceState::Error
        } else if self.inner.value.borrow().is_none() {
            ResourceState::Loading
        } else if self.is_refetching() {
            ResourceState::Refetching
        } else {
            ResourceState::Ready
        }
    }

    pub fn watch_key(&self) -> watch::Receiver<Option<String>> {
        self.inner.key.subscribe()
    }

    pub fn watch_value(&self) -> watch::Receiver<Option<V>> {
        self.inner.value.subscribe()
    }

    pub fn watch_error(&self) -> watch::Receiver<Option<CacheError>> {
        self.inner.error.subscribe()
    }

    pub fn watch_refetching(&self) -> watch::Receiver<bool> {
        self.inner.refetching.subscribe()
    }

    /// Take the stream of surfaced errors, one item per `error` event.
    ///
    /// Only resources built without a host have one, and it can be taken once.
    /// Nothing is buffered before the stream is taken: earlier errors are only
    /// visible through [`error`](Self::error).
    pub fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<CacheError>> {
        lock(&self.inner.errors).take()
    }

    /// Re-run the key producer now, outside of any declared dependency change.
    pub fn recompute_key(&self) {
        self.inner.recompute();
    }

    /// Fetch the current key, waiting for a fresh value instead of accepting a
    /// stale one. `options` are layered over the resource's query options.
    ///
    /// Returns `Ok(None)` without touching the engine when there is no key.
    pub async fn refetch(&self, options: QueryOptions) -> Result<Option<V>, ResourceError> {
        self.inner.refetch(&options).await
    }

    /// Write the local value of the current key. No-op without a key.
    pub fn mutate(&self, mutation: impl Into<Mutation<V>>) {
        if let Some(key) = self.key() {
            self.inner.facade.mutate(&key, mutation.into());
        }
    }

    /// Evict the current key from the engine. No-op without a key.
    pub fn forget(&self) {
        if let Some(key) = self.key() {
            self.inner.facade.forget(&key);
        }
    }

    /// Cancel the in-flight fetch of the current key. No-op without a key.
    ///
    /// The pending `refetch` future is not cancelled here; it settles once the
    /// engine rejects the aborted fetch.
    pub fn abort(&self, reason: Option<&str>) {
        if let Some(key) = self.key() {
            self.inner.facade.abort(&key, reason);
        }
    }

    /// Clear the error slot and resolve the current key again.
    pub fn clear_error(&self) {
        let _subscriptions = lock(&self.inner.subscriptions);
        self.inner.error.send_replace(None);
        if let Some(key) = self.key() {
            let generation = self.inner.generation.load(Ordering::SeqCst);
            self.inner.resolve(key, generation);
        }
    }

    /// Track how long until the current key's value goes stale, polling every
    /// `precision`.
    pub fn create_stale(&self, precision: Duration) -> StaleTracker {
        StaleTracker::spawn(
            self.inner.key.subscribe(),
            self.inner.facade.clone(),
            Arc::clone(&self.inner.clock),
            precision,
            &self.inner.runtime,
        )
    }

    /// Track when the next focus-triggered refetch becomes available, polling
    /// every `precision`.
    pub fn create_focus_available(&self, precision: Duration) -> FocusTracker {
        FocusTracker::spawn(self.inner.focus.clone(), precision, &self.inner.runtime)
    }

    /// Tear down the current subscriptions and stop following the key.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<V> Drop for Resource<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<V> fmt::Debug for Resource<V>
where
    V: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("key", &self.key())
            .field("state", &self.state())
            .field("value", &self.value())
            .field("error", &self.error())
            .finish()
    }
}
