//! Reactive key resolution.

use futures::StreamExt;
use futures::stream::{self, BoxStream, Stream};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::KeyError;

pub(crate) type KeyProducer = Arc<dyn Fn() -> Result<Option<String>, KeyError> + Send + Sync>;

/// Produces the cache key for a resource and declares what it depends on.
///
/// The producer runs once at construction and again after every dependency
/// change. A producer that fails, panics, or yields `None` or an empty string
/// leaves the resource without a key; the failure never reaches the caller.
///
/// # Example
/// ```ignore
/// let (user_id, user_id_rx) = watch::channel(Some(1u64));
/// let key = KeyResolver::new(move || Ok(user_id_rx.borrow().map(|id| format!("user:{id}"))))
///     .depends_on(user_id.subscribe());
/// ```
pub struct KeyResolver {
    producer: KeyProducer,
    dependencies: Vec<BoxStream<'static, ()>>,
}

impl KeyResolver {
    /// Create a resolver from a fallible key producer.
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn() -> Result<Option<String>, KeyError> + Send + Sync + 'static,
    {
        KeyResolver {
            producer: Arc::new(producer),
            dependencies: Vec::new(),
        }
    }

    /// A resolver whose key never changes.
    pub fn fixed(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move || Ok(Some(key.clone())))
    }

    /// A resolver that follows a watched key cell.
    pub fn watch(cell: watch::Receiver<Option<String>>) -> Self {
        let source = cell.clone();
        Self::new(move || Ok(source.borrow().clone())).depends_on(cell)
    }

    /// Re-run the producer whenever `cell` changes.
    pub fn depends_on<T>(self, cell: watch::Receiver<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let changes = stream::unfold(cell, |mut cell| async move {
            cell.changed().await.ok().map(|_| ((), cell))
        });
        self.depends_on_stream(changes)
    }

    /// Re-run the producer on every item of `changes`.
    pub fn depends_on_stream<S>(mut self, changes: S) -> Self
    where
        S: Stream<Item = ()> + Send + 'static,
    {
        self.dependencies.push(changes.boxed());
        self
    }

    /// Evaluate the producer, mapping every failure to `None`.
    pub fn resolve(&self) -> Option<String> {
        resolve_key(&self.producer)
    }

    /// Split into the producer and the merged stream of dependency changes.
    pub(crate) fn into_parts(self) -> (KeyProducer, BoxStream<'static, ()>) {
        let changes = stream::select_all(self.dependencies).boxed();
        (self.producer, changes)
    }
}

/// Run `producer`, mapping every failure to `None`.
pub(crate) fn resolve_key(producer: &KeyProducer) -> Option<String> {
    match catch_unwind(AssertUnwindSafe(|| producer())) {
        Ok(Ok(Some(key))) if !key.is_empty() => Some(key),
        Ok(Ok(_)) => None,
        Ok(Err(error)) => {
            tracing::debug!(error = %error, "key producer failed, treating key as absent");
            None
        }
        Err(_) => {
            tracing::debug!("key producer panicked, treating key as absent");
            None
        }
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver")
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}
