use serde::{Deserialize, Serialize};

/// A cached value together with its expiration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<V> {
    /// The cached value.
    pub value: V,

    /// Unix timestamp in milliseconds.
    /// Before this time the entry is fresh; after it the value is stale but
    /// may still be served to stale-accepting reads.
    pub expires_at: i64,
}

impl<V> Entry<V> {
    /// Create a new cache entry.
    pub fn new(value: V, expires_at: i64) -> Self {
        Entry { value, expires_at }
    }

    /// Check if the entry is still fresh.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }

    /// Check if the entry has expired. Expired entries are still served to
    /// stale-accepting reads.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// Milliseconds until expiration, zero once expired.
    pub fn expires_in(&self, now_ms: i64) -> i64 {
        self.expires_at.saturating_sub(now_ms).max(0)
    }
}
