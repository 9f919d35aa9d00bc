//! Builder API for creating resources.
//!
//! The builder collects the key resolver, the call-site options, an optional
//! explicit context and an optional host, then resolves the option layers and
//! starts the resource.

use std::sync::Arc;

use crate::context::{ResourceContext, use_context};
use crate::error::ResourceError;
use crate::facade::CacheFacade;
use crate::host::Host;
use crate::key::KeyResolver;
use crate::options::{ResourceOptions, Settings, default_clock};
use crate::resource::Resource;

/// Builder for [`Resource`].
///
/// # Example
///
/// ```ignore
/// use swr_resource::{KeyResolver, MemoryEngine, MemoryEngineConfig, Resource, ResourceOptions};
/// use std::sync::Arc;
///
/// let engine = Arc::new(MemoryEngine::new(MemoryEngineConfig::default(), |key| async move {
///     Ok(format!("profile of {key}"))
/// }));
///
/// let profile = Resource::builder(KeyResolver::fixed("user:42"))
///     .options(ResourceOptions::new().engine(engine).clear_on_forget(true))
///     .build()?;
/// ```
pub struct ResourceBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    key: KeyResolver,
    options: ResourceOptions<V>,
    context: Option<ResourceContext<V>>,
    host: Option<Arc<dyn Host>>,
}

impl<V> ResourceBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new builder for the keys produced by `key`.
    pub fn new(key: KeyResolver) -> Self {
        ResourceBuilder {
            key,
            options: ResourceOptions::new(),
            context: None,
            host: None,
        }
    }

    /// Call-site options. These win over every context field they set.
    pub fn options(mut self, options: ResourceOptions<V>) -> Self {
        self.options = options;
        self
    }

    /// Use `context` instead of the process-wide one registered for `V`.
    pub fn context(mut self, context: ResourceContext<V>) -> Self {
        self.context = Some(context);
        self
    }

    /// Tie the resource's lifetime and error boundary to `host`.
    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    /// Resolve the option layers and start the resource.
    ///
    /// # Errors
    /// * [`ResourceError::MissingEngine`] when no layer supplies an engine
    /// * [`ResourceError::NoRuntime`] when called outside a Tokio runtime
    pub fn build(self) -> Result<Resource<V>, ResourceError> {
        let context = self.context.or_else(use_context::<V>).unwrap_or_default();
        let merged = self.options.merge_over(&context);

        let engine = merged.engine.ok_or(ResourceError::MissingEngine)?;
        let settings = Settings::resolve(&merged.config);
        let facade = CacheFacade::new(engine, settings.query.clone());
        let clock = merged.clock.unwrap_or_else(default_clock);
        let environment = merged.environment.unwrap_or_default();

        tracing::debug!(
            engine = facade.engine_name(),
            refetch_on_focus = settings.refetch_on_focus,
            refetch_on_connect = settings.refetch_on_connect,
            "building resource"
        );

        Resource::start(self.key, facade, settings, environment, clock, self.host)
    }
}
