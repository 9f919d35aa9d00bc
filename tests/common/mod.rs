//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use swr_resource::{
    Beacon, CacheEngine, CacheError, CacheEvent, EventCallback, EventKind, Listeners, Mutation,
    QueryOptions, SignalHandler, SignalSource, Subscription,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

pub fn user(id: u64, name: &str) -> User {
    User {
        id,
        name: name.into(),
    }
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An engine that records every call and lets the test raise events by hand.
pub struct RecordingEngine<V> {
    log: Arc<Mutex<Vec<String>>>,
    values: Mutex<HashMap<String, V>>,
    expirations: Mutex<HashMap<String, i64>>,
    events: Mutex<HashMap<String, Listeners<CacheEvent<V>>>>,
}

impl<V> RecordingEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingEngine {
            log: Arc::new(Mutex::new(Vec::new())),
            values: Mutex::new(HashMap::new()),
            expirations: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
        })
    }

    /// Value returned by queries for `key`. Unknown keys fail to fetch.
    pub fn set_value(&self, key: &str, value: V) {
        self.values.lock().unwrap().insert(key.into(), value);
    }

    pub fn set_expiration(&self, key: &str, expires_at: i64) {
        self.expirations.lock().unwrap().insert(key.into(), expires_at);
    }

    /// Raise `event` for `key` to the current subscribers.
    pub fn emit(&self, key: &str, event: CacheEvent<V>) {
        let listeners = self
            .events
            .lock()
            .unwrap()
            .get(&format!("{}::{}", key, event.kind()))
            .cloned();
        if let Some(listeners) = listeners {
            listeners.emit(&event);
        }
    }

    /// Live subscriptions across all event kinds of `key`.
    pub fn subscribers(&self, key: &str) -> usize {
        let events = self.events.lock().unwrap();
        EventKind::ALL
            .iter()
            .filter_map(|kind| events.get(&format!("{}::{}", key, kind)))
            .map(|listeners| listeners.len())
            .sum()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Log lines starting with `prefix`.
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    /// A signal source named `name` that records into this engine's log.
    pub fn signal(&self, name: &str) -> Arc<RecordingSignal> {
        Arc::new(RecordingSignal {
            name: name.into(),
            log: Arc::clone(&self.log),
            beacon: Beacon::new(),
        })
    }

    fn record(&self, line: String) {
        self.log.lock().unwrap().push(line);
    }
}

/// A [`Beacon`] that logs its subscribe and unsubscribe calls next to the
/// engine's, so their relative order can be asserted.
pub struct RecordingSignal {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    beacon: Beacon,
}

impl RecordingSignal {
    pub fn fire(&self) {
        self.beacon.fire();
    }

    pub fn subscriber_count(&self) -> usize {
        self.beacon.subscriber_count()
    }
}

impl SignalSource for RecordingSignal {
    fn subscribe(&self, handler: SignalHandler) -> Subscription {
        self.log.lock().unwrap().push(format!("subscribe {}", self.name));
        let inner = self.beacon.subscribe(handler);

        let name = self.name.clone();
        let log = Arc::clone(&self.log);
        Subscription::new(move || {
            log.lock().unwrap().push(format!("unsubscribe {}", name));
            drop(inner);
        })
    }
}

#[async_trait]
impl<V> CacheEngine<V> for RecordingEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn query(&self, key: &str, options: &QueryOptions) -> Result<V, CacheError> {
        self.record(format!(
            "query {} stale={:?} fresh={:?}",
            key, options.stale, options.fresh
        ));
        self.values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::fetch(key, "unknown key"))
    }

    fn mutate(&self, key: &str, mutation: Mutation<V>) {
        self.record(format!("mutate {}", key));
        let value = {
            let mut values = self.values.lock().unwrap();
            let value = mutation.apply(values.get(key));
            values.insert(key.into(), value.clone());
            value
        };
        self.emit(key, CacheEvent::Mutated(value));
    }

    fn subscribe(&self, key: &str, kind: EventKind, callback: EventCallback<V>) -> Subscription {
        let event_key = format!("{}::{}", key, kind);
        self.record(format!("subscribe {}", event_key));
        let listeners = self
            .events
            .lock()
            .unwrap()
            .entry(event_key.clone())
            .or_default()
            .clone();
        let inner = listeners.add(callback);

        let log = Arc::clone(&self.log);
        Subscription::new(move || {
            log.lock().unwrap().push(format!("unsubscribe {}", event_key));
            drop(inner);
        })
    }

    fn forget(&self, key: &str) {
        self.record(format!("forget {}", key));
        self.values.lock().unwrap().remove(key);
        self.emit(key, CacheEvent::Forgotten);
    }

    fn abort(&self, key: &str, reason: Option<&str>) {
        self.record(format!("abort {} {:?}", key, reason));
    }

    fn expiration(&self, key: &str) -> Option<i64> {
        self.expirations.lock().unwrap().get(key).copied()
    }
}
