//! Layered resource options.
//!
//! Options come from three places, highest precedence first: the call site
//! that creates a resource, the injected [`ResourceContext`](crate::ResourceContext),
//! and the defaults below. Every layer keeps its fields optional so layers merge
//! field by field; [`Settings`] is the fully resolved view.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::engine::{CacheEngine, QueryOptions};
use crate::environment::Environment;

// Default values for resource options
pub const DEFAULT_REFETCH_ON_FOCUS: bool = true;
pub const DEFAULT_REFETCH_ON_CONNECT: bool = true;
pub const DEFAULT_FOCUS_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CLEAR_ON_FORGET: bool = false;

/// Plain-data resource options, loadable from any serde format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Refetch when the window regains focus.
    pub refetch_on_focus: Option<bool>,
    /// Refetch when the network reconnects.
    pub refetch_on_connect: Option<bool>,
    /// Minimum time between two focus-triggered refetches.
    #[serde(with = "crate::utils::serde_millis")]
    pub focus_interval: Option<Duration>,
    /// Clear the local value when the engine forgets the key.
    pub clear_on_forget: Option<bool>,
    /// Fetch options handed to the engine on every query.
    pub query: QueryOptions,
}

impl ResourceConfig {
    /// Layer `self` over `base`: set fields in `self` win.
    pub fn merge_over(&self, base: &ResourceConfig) -> ResourceConfig {
        ResourceConfig {
            refetch_on_focus: self.refetch_on_focus.or(base.refetch_on_focus),
            refetch_on_connect: self.refetch_on_connect.or(base.refetch_on_connect),
            focus_interval: self.focus_interval.or(base.focus_interval),
            clear_on_forget: self.clear_on_forget.or(base.clear_on_forget),
            query: self.query.merge_over(&base.query),
        }
    }
}

/// Options for one resource: plain config plus the collaborators it runs against.
pub struct ResourceOptions<V> {
    /// Alternate engine instance. Falls back to the context's engine.
    pub engine: Option<Arc<dyn CacheEngine<V>>>,
    /// Focus and online signal sources.
    pub environment: Option<Environment>,
    /// Time source for throttling and staleness.
    pub clock: Option<Arc<dyn Clock>>,
    pub config: ResourceConfig,
}

impl<V> ResourceOptions<V> {
    pub fn new() -> Self {
        ResourceOptions {
            engine: None,
            environment: None,
            clock: None,
            config: ResourceConfig::default(),
        }
    }

    pub fn engine(mut self, engine: Arc<dyn CacheEngine<V>>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: ResourceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn refetch_on_focus(mut self, enabled: bool) -> Self {
        self.config.refetch_on_focus = Some(enabled);
        self
    }

    pub fn refetch_on_connect(mut self, enabled: bool) -> Self {
        self.config.refetch_on_connect = Some(enabled);
        self
    }

    pub fn focus_interval(mut self, interval: Duration) -> Self {
        self.config.focus_interval = Some(interval);
        self
    }

    pub fn clear_on_forget(mut self, enabled: bool) -> Self {
        self.config.clear_on_forget = Some(enabled);
        self
    }

    pub fn query(mut self, query: QueryOptions) -> Self {
        self.config.query = query;
        self
    }

    /// Layer `self` over `base`: set fields in `self` win.
    pub fn merge_over(&self, base: &ResourceOptions<V>) -> ResourceOptions<V> {
        ResourceOptions {
            engine: self.engine.clone().or_else(|| base.engine.clone()),
            environment: self
                .environment
                .clone()
                .or_else(|| base.environment.clone()),
            clock: self.clock.clone().or_else(|| base.clock.clone()),
            config: self.config.merge_over(&base.config),
        }
    }
}

impl<V> Clone for ResourceOptions<V> {
    fn clone(&self) -> Self {
        ResourceOptions {
            engine: self.engine.clone(),
            environment: self.environment.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<V> Default for ResourceOptions<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for ResourceOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceOptions")
            .field("engine", &self.engine.as_ref().map(|e| e.name()))
            .field("environment", &self.environment)
            .field("clock", &self.clock.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Fully resolved option values for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub refetch_on_focus: bool,
    pub refetch_on_connect: bool,
    pub focus_interval: Duration,
    pub clear_on_forget: bool,
    pub query: QueryOptions,
}

impl Settings {
    /// Fill unset fields with the library defaults.
    pub fn resolve(config: &ResourceConfig) -> Self {
        Settings {
            refetch_on_focus: config.refetch_on_focus.unwrap_or(DEFAULT_REFETCH_ON_FOCUS),
            refetch_on_connect: config
                .refetch_on_connect
                .unwrap_or(DEFAULT_REFETCH_ON_CONNECT),
            focus_interval: config.focus_interval.unwrap_or(DEFAULT_FOCUS_INTERVAL),
            clear_on_forget: config.clear_on_forget.unwrap_or(DEFAULT_CLEAR_ON_FORGET),
            query: config.query.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(&ResourceConfig::default())
    }
}

/// Clock used when no layer supplies one.
pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
