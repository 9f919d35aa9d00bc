//! Binds a resource to a switching key and simulates focus and reconnect signals.
//!
//! Run with `RUST_LOG=swr_resource=debug cargo run --example focus_refetch`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swr_resource::{
    Beacon, CacheError, Environment, KeyResolver, MemoryEngine, MemoryEngineConfig,
    QueryOptions, Resource, ResourceOptions,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let engine = Arc::new(MemoryEngine::new(
        MemoryEngineConfig {
            expiration: Duration::from_secs(1),
            ..Default::default()
        },
        move |key: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if key.ends_with(":0") {
                    return Err(CacheError::fetch(key, "no such user"));
                }
                Ok(format!("{} (load #{})", key, n))
            }
        },
    ));

    let focus = Beacon::new();
    let online = Beacon::new();
    let (user_id, user_id_rx) = watch::channel(Some(1u32));
    let source = user_id_rx.clone();

    let profile = Resource::builder(
        KeyResolver::new(move || Ok(source.borrow().map(|id| format!("user:{id}"))))
            .depends_on(user_id_rx),
    )
    .options(
        ResourceOptions::new()
            .engine(engine)
            .environment(
                Environment::headless()
                    .with_focus(Arc::new(focus.clone()))
                    .with_online(Arc::new(online.clone())),
            )
            .focus_interval(Duration::from_millis(500)),
    )
    .build()?;
    let mut errors = profile.take_errors().ok_or("error stream already taken")?;

    let mut value = profile.watch_value();
    value.changed().await?;
    tracing::info!(value = ?profile.value(), "initial value");

    let stale = profile.create_stale(Duration::from_millis(100));
    let available = profile.create_focus_available(Duration::from_millis(100));

    // Throttled: the interval has not elapsed since creation
    focus.fire();
    tokio::time::sleep(Duration::from_millis(600)).await;
    tracing::info!(available = available.is_available(), "focus availability");
    focus.fire();
    value.changed().await?;
    tracing::info!(value = ?profile.value(), "after focus");

    online.fire();
    value.changed().await?;
    tracing::info!(value = ?profile.value(), "after reconnect");

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    tracing::info!(stale = stale.is_stale(), stale_in = stale.stale_in(), "staleness");

    user_id.send_replace(Some(2));
    value.changed().await?;
    tracing::info!(key = ?profile.key(), value = ?profile.value(), "switched user");

    user_id.send_replace(Some(0));
    if let Some(error) = errors.recv().await {
        tracing::warn!(%error, state = ?profile.state(), "load failed");
    }

    let fresh = profile.refetch(QueryOptions::fresh(true)).await;
    tracing::info!(result = ?fresh.map_err(|e| e.to_string()), "explicit refetch");

    user_id.send_replace(None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    tracing::info!(state = ?profile.state(), loads = loads.load(Ordering::SeqCst), "done");

    profile.dispose();
    Ok(())
}
