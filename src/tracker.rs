//! Polling trackers derived from a resource: time until the current value goes
//! stale, and time until the next focus refetch is allowed.
//!
//! Both poll at a caller-chosen precision and publish through watch channels,
//! so observers only wake when a reading actually changes. A tracker stops
//! polling when disposed or dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::clock::Clock;
use crate::environment::FocusGate;
use crate::facade::CacheFacade;

const MIN_PRECISION: Duration = Duration::from_millis(1);

/// One staleness reading for the current key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staleness {
    pub is_stale: bool,
    /// Milliseconds until the value goes stale, never negative.
    pub stale_in: i64,
}

impl Staleness {
    fn measure(expires_at: Option<i64>, now: i64) -> Self {
        match expires_at {
            // Unknown keys count as stale.
            None => Staleness {
                is_stale: true,
                stale_in: 0,
            },
            Some(at) => Staleness {
                is_stale: at < now,
                stale_in: at.saturating_sub(now).max(0),
            },
        }
    }
}

/// One availability reading for focus-triggered refetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusAvailability {
    pub is_available: bool,
    /// Milliseconds until a focus refetch is allowed again, never negative.
    pub available_in: i64,
}

impl FocusAvailability {
    fn measure(gate: &FocusGate) -> Self {
        let elapsed = gate.elapsed();
        FocusAvailability {
            is_available: elapsed > gate.interval_ms(),
            available_in: gate.interval_ms().saturating_sub(elapsed).max(0),
        }
    }
}

fn publish<T: PartialEq + Copy>(cell: &watch::Sender<T>, reading: T) {
    cell.send_if_modified(|current| {
        if *current == reading {
            false
        } else {
            *current = reading;
            true
        }
    });
}

fn ticker(precision: Duration) -> tokio::time::Interval {
    let precision = precision.max(MIN_PRECISION);
    let mut ticker = interval_at(Instant::now() + precision, precision);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Tracks whether the resource's current value is stale.
///
/// Restarts from a fresh reading whenever the resource's key changes.
#[derive(Debug)]
pub struct StaleTracker {
    reading: watch::Receiver<Staleness>,
    task: JoinHandle<()>,
}

impl StaleTracker {
    pub(crate) fn spawn<V>(
        mut key: watch::Receiver<Option<String>>,
        facade: CacheFacade<V>,
        clock: Arc<dyn Clock>,
        precision: Duration,
        runtime: &Handle,
    ) -> Self
    where
        V: Send + Sync + 'static,
    {
        let measure = move |key: Option<&str>| {
            let expires_at = key.and_then(|key| facade.expiration(key));
            Staleness::measure(expires_at, clock.now_ms())
        };

        let initial = measure(key.borrow_and_update().as_deref());
        let (cell, reading) = watch::channel(initial);

        let task = runtime.spawn(async move {
            loop {
                let current = key.borrow_and_update().clone();
                publish(&cell, measure(current.as_deref()));

                if current.is_none() {
                    if key.changed().await.is_err() {
                        return;
                    }
                    continue;
                }

                let mut ticker = ticker(precision);
                loop {
                    tokio::select! {
                        changed = key.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            break;
                        }
                        _ = ticker.tick() => publish(&cell, measure(current.as_deref())),
                    }
                }
            }
        });

        StaleTracker { reading, task }
    }

    pub fn is_stale(&self) -> bool {
        self.reading.borrow().is_stale
    }

    pub fn stale_in(&self) -> i64 {
        self.reading.borrow().stale_in
    }

    pub fn reading(&self) -> Staleness {
        *self.reading.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Staleness> {
        self.reading.clone()
    }

    /// Stop polling. The last reading stays readable.
    pub fn dispose(&self) {
        self.task.abort();
    }
}

impl Drop for StaleTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Tracks when the next focus-triggered refetch becomes available.
#[derive(Debug)]
pub struct FocusTracker {
    reading: watch::Receiver<FocusAvailability>,
    task: JoinHandle<()>,
}

impl FocusTracker {
    pub(crate) fn spawn(gate: FocusGate, precision: Duration, runtime: &Handle) -> Self {
        let (cell, reading) = watch::channel(FocusAvailability::measure(&gate));

        let task = runtime.spawn(async move {
            let mut ticker = ticker(precision);
            loop {
                ticker.tick().await;
                publish(&cell, FocusAvailability::measure(&gate));
            }
        });

        FocusTracker { reading, task }
    }

    pub fn is_available(&self) -> bool {
        self.reading.borrow().is_available
    }

    pub fn available_in(&self) -> i64 {
        self.reading.borrow().available_in
    }

    pub fn reading(&self) -> FocusAvailability {
        *self.reading.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<FocusAvailability> {
        self.reading.clone()
    }

    /// Stop polling. The last reading stays readable.
    pub fn dispose(&self) {
        self.task.abort();
    }
}

impl Drop for FocusTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
