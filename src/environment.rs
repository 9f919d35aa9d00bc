//! Environment-driven refetch triggers: window focus regain and network reconnect.
//!
//! Both signal sources are optional. A host without them (a server, a test, a
//! terminal) simply gets triggers that never fire.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::clock::Clock;
use crate::listeners::Listeners;
use crate::subscription::Subscription;
use crate::utils::millis;

/// Handler invoked for each raw environment signal.
pub type SignalHandler = Arc<dyn Fn() + Send + Sync>;

/// Something that can notify about an environment signal.
pub trait SignalSource: Send + Sync {
    fn subscribe(&self, handler: SignalHandler) -> Subscription;
}

/// A signal source the host fires by hand, e.g. from its window or network
/// event loop.
#[derive(Clone, Default)]
pub struct Beacon {
    listeners: Listeners<()>,
}

impl Beacon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify every subscriber.
    pub fn fire(&self) {
        self.listeners.emit(&());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

impl SignalSource for Beacon {
    fn subscribe(&self, handler: SignalHandler) -> Subscription {
        self.listeners.add(Arc::new(move |_: &()| handler()))
    }
}

/// The environment signal sources available to resources.
#[derive(Clone, Default)]
pub struct Environment {
    /// Fires when the window regains focus.
    pub focus: Option<Arc<dyn SignalSource>>,
    /// Fires when the network comes back online.
    pub online: Option<Arc<dyn SignalSource>>,
}

impl Environment {
    /// An environment with no signal sources.
    pub fn headless() -> Self {
        Self::default()
    }

    pub fn with_focus(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.focus = Some(source);
        self
    }

    pub fn with_online(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.online = Some(source);
        self
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("focus", &self.focus.is_some())
            .field("online", &self.online.is_some())
            .finish()
    }
}

/// Throttle state for focus-triggered refetches.
///
/// `last_focus` only moves when a refetch actually fires.
#[derive(Clone)]
pub struct FocusGate {
    last_focus: Arc<AtomicI64>,
    interval_ms: i64,
    clock: Arc<dyn Clock>,
}

impl FocusGate {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let now = clock.now_ms();
        FocusGate {
            last_focus: Arc::new(AtomicI64::new(now)),
            interval_ms: millis(interval),
            clock,
        }
    }

    /// Timestamp of the last focus refetch (creation time before the first).
    pub fn last_focus(&self) -> i64 {
        self.last_focus.load(Ordering::SeqCst)
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Milliseconds since the last focus refetch.
    pub fn elapsed(&self) -> i64 {
        self.clock.now_ms().saturating_sub(self.last_focus())
    }

    /// Claim the gate if the interval has elapsed, recording `now` on success.
    pub fn try_pass(&self) -> bool {
        let now = self.clock.now_ms();
        let interval = self.interval_ms;
        self.last_focus
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (now.saturating_sub(last) > interval).then_some(now)
            })
            .is_ok()
    }
}

impl fmt::Debug for FocusGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FocusGate")
            .field("last_focus", &self.last_focus())
            .field("interval_ms", &self.interval_ms)
            .finish()
    }
}

/// Refetch on focus regain, at most once per gate interval.
pub fn on_focus(
    source: Option<&Arc<dyn SignalSource>>,
    enabled: bool,
    gate: FocusGate,
    refetch: SignalHandler,
) -> Subscription {
    let Some(source) = source.filter(|_| enabled) else {
        return Subscription::noop();
    };

    source.subscribe(Arc::new(move || {
        if gate.try_pass() {
            tracing::debug!("focus regained, refetching");
            refetch();
        } else {
            tracing::trace!(elapsed_ms = gate.elapsed(), "focus refetch throttled");
        }
    }))
}

/// Refetch on every reconnect.
pub fn on_connect(
    source: Option<&Arc<dyn SignalSource>>,
    enabled: bool,
    refetch: SignalHandler,
) -> Subscription {
    let Some(source) = source.filter(|_| enabled) else {
        return Subscription::noop();
    };

    source.subscribe(Arc::new(move || {
        tracing::debug!("network reconnected, refetching");
        refetch();
    }))
}
