//! Integration with component-like hosts.
//!
//! A host owns a lifetime (a component, a view, a request) and an error
//! boundary. Resources created inside a host register their disposal with it
//! and route surfaced errors to it; resources created without one are disposed
//! by their caller and expose errors through their own stream.

use std::sync::Mutex;

use crate::error::CacheError;
use crate::utils::lock;

/// Teardown callback registered with a host.
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Lifecycle and error-boundary hooks of a component-like host.
pub trait Host: Send + Sync {
    /// Run `teardown` when the host's lifetime ends.
    fn on_teardown(&self, teardown: Teardown);

    /// Receive an error surfaced by a resource. Called once per occurrence.
    fn on_error(&self, error: CacheError);
}

/// A minimal host: collects teardowns and captured errors, and runs the
/// teardowns on [`close`](Scope::close).
#[derive(Default)]
pub struct Scope {
    teardowns: Mutex<Vec<Teardown>>,
    errors: Mutex<Vec<CacheError>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// End the scope: run every registered teardown, most recent first.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        let teardowns: Vec<Teardown> = lock(&self.teardowns).drain(..).collect();
        for teardown in teardowns.into_iter().rev() {
            teardown();
        }
    }

    /// Errors captured so far, oldest first. Clears the buffer.
    pub fn take_errors(&self) -> Vec<CacheError> {
        std::mem::take(&mut *lock(&self.errors))
    }

    /// Number of teardowns waiting for `close`.
    pub fn pending_teardowns(&self) -> usize {
        lock(&self.teardowns).len()
    }
}

impl Host for Scope {
    fn on_teardown(&self, teardown: Teardown) {
        lock(&self.teardowns).push(teardown);
    }

    fn on_error(&self, error: CacheError) {
        tracing::warn!(error = %error, "resource error reached scope boundary");
        lock(&self.errors).push(error);
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.close();
    }
}
