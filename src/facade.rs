use std::fmt;
use std::sync::Arc;

use crate::engine::{CacheEngine, EventCallback, EventKind, Mutation, QueryOptions};
use crate::error::CacheError;
use crate::subscription::Subscription;

/// The engine primitives a resource runs against, resolved once from its
/// option layers.
///
/// Nothing here retries or caches: every call goes straight to the engine.
/// Query options are merged per call, over the resource's default query options.
pub struct CacheFacade<V> {
    engine: Arc<dyn CacheEngine<V>>,
    defaults: QueryOptions,
}

impl<V> Clone for CacheFacade<V> {
    fn clone(&self) -> Self {
        CacheFacade {
            engine: Arc::clone(&self.engine),
            defaults: self.defaults.clone(),
        }
    }
}

impl<V> fmt::Debug for CacheFacade<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFacade")
            .field("engine", &self.engine.name())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl<V> CacheFacade<V> {
    pub fn new(engine: Arc<dyn CacheEngine<V>>, defaults: QueryOptions) -> Self {
        CacheFacade { engine, defaults }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// The query options every call starts from.
    pub fn defaults(&self) -> &QueryOptions {
        &self.defaults
    }

    /// Query `key` with `options` layered over the defaults.
    pub async fn query(&self, key: &str, options: &QueryOptions) -> Result<V, CacheError> {
        let options = options.merge_over(&self.defaults);
        self.engine.query(key, &options).await
    }

    pub fn mutate(&self, key: &str, mutation: Mutation<V>) {
        self.engine.mutate(key, mutation);
    }

    pub fn subscribe(&self, key: &str, kind: EventKind, callback: EventCallback<V>) -> Subscription {
        self.engine.subscribe(key, kind, callback)
    }

    pub fn forget(&self, key: &str) {
        self.engine.forget(key);
    }

    pub fn abort(&self, key: &str, reason: Option<&str>) {
        self.engine.abort(key, reason);
    }

    pub fn expiration(&self, key: &str) -> Option<i64> {
        self.engine.expiration(key)
    }
}
