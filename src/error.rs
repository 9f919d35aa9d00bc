/// Error raised by a cache engine for a single key.
///
/// This is the payload of the `error` cache event and the value held in a
/// resource's error slot, so it must stay cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The fetcher for a key failed.
    #[error("fetch failed for key '{key}': {message}")]
    Fetch { key: String, message: String },
    /// An in-flight fetch was cancelled through `abort`.
    #[error("fetch aborted for key '{key}'{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Aborted { key: String, reason: Option<String> },
    /// Serialization or deserialization of passthrough options failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Create a new fetch error.
    pub fn fetch(key: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Fetch {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new abort error.
    pub fn aborted(key: impl Into<String>, reason: Option<String>) -> Self {
        CacheError::Aborted {
            key: key.into(),
            reason,
        }
    }

    /// The key this error belongs to, when it has one.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::Fetch { key, .. } | CacheError::Aborted { key, .. } => Some(key),
            CacheError::Serialization(_) => None,
        }
    }
}

/// Error type for resource construction and explicit resource operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    /// Neither the call-site options nor any context supplied a cache engine.
    #[error("no cache engine configured: pass one in the options or provide a context")]
    MissingEngine,
    /// Resources spawn background work and must be built inside a Tokio runtime.
    #[error("resources must be created within a Tokio runtime")]
    NoRuntime,
    /// The engine rejected an explicit operation.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Error returned by a key producer. Always recovered into "no key".
pub type KeyError = Box<dyn std::error::Error + Send + Sync>;
