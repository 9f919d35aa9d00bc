//! Integration tests for swr-resource bindings against recording and in-memory engines.

mod common;

use common::{RecordingEngine, User, init_tracing, user};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swr_resource::{
    Beacon, CacheError, CacheEvent, Clock, Environment, KeyError, KeyResolver, ManualClock,
    MemoryEngine, MemoryEngineConfig, Mutation, QueryOptions, Resource, ResourceOptions,
    ResourceState, Scope,
};
use tokio::sync::watch;

// ============================================================================
// Helpers
// ============================================================================

/// Let spawned resolution and driver tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

fn users() -> Arc<RecordingEngine<User>> {
    let engine = RecordingEngine::new();
    engine.set_value("user:1", user(1, "Alice"));
    engine.set_value("user:2", user(2, "Bob"));
    engine
}

fn bind(
    engine: &Arc<RecordingEngine<User>>,
    key: KeyResolver,
    options: ResourceOptions<User>,
) -> Resource<User> {
    Resource::builder(key)
        .options(options.engine(engine.clone()))
        .build()
        .unwrap()
}

// ============================================================================
// Key resolution
// ============================================================================

#[tokio::test]
async fn test_failing_key_producer_never_touches_engine() {
    init_tracing();
    let engine = users();

    let failing = bind(
        &engine,
        KeyResolver::new(|| Err(KeyError::from("not signed in"))),
        ResourceOptions::new(),
    );
    let panicking = bind(
        &engine,
        KeyResolver::new(|| panic!("user store not ready")),
        ResourceOptions::new(),
    );
    settle().await;

    for resource in [&failing, &panicking] {
        assert_eq!(resource.key(), None);
        assert_eq!(resource.state(), ResourceState::Idle);
        assert_eq!(resource.value(), None);
        assert_eq!(resource.error(), None);
    }
    assert!(engine.log().is_empty());
}

#[tokio::test]
async fn test_unchanged_key_does_not_resubscribe() {
    let engine = users();
    let (user_id, user_id_rx) = watch::channel(1u64);
    let source = user_id_rx.clone();
    let resource = bind(
        &engine,
        KeyResolver::new(move || Ok(Some(format!("user:{}", *source.borrow() % 2 + 1))))
            .depends_on(user_id_rx),
        ResourceOptions::new(),
    );
    settle().await;
    engine.clear_log();

    // 3 % 2 + 1 == 1 % 2 + 1
    user_id.send_replace(3);
    settle().await;
    assert!(engine.log().is_empty());

    resource.recompute_key();
    assert!(engine.log().is_empty());
    assert_eq!(resource.key().as_deref(), Some("user:2"));
}

// ============================================================================
// Key transitions
// ============================================================================

#[tokio::test]
async fn test_old_key_is_torn_down_before_new_key_subscribes() {
    let engine = users();
    let (key, key_rx) = watch::channel(Some("user:1".to_string()));
    let _resource = bind(&engine, KeyResolver::watch(key_rx), ResourceOptions::new());
    settle().await;
    engine.clear_log();

    key.send_replace(Some("user:2".to_string()));
    settle().await;

    let log = engine.log();
    let last_unsubscribe = log
        .iter()
        .rposition(|line| line.starts_with("unsubscribe user:1"))
        .unwrap();
    let first_subscribe = log
        .iter()
        .position(|line| line.starts_with("subscribe user:2"))
        .unwrap();
    assert!(last_unsubscribe < first_subscribe, "log: {:?}", log);
    assert_eq!(engine.calls("unsubscribe user:1").len(), 5);
    assert_eq!(engine.calls("subscribe user:2").len(), 5);
    assert_eq!(engine.subscribers("user:1"), 0);
    assert_eq!(engine.subscribers("user:2"), 5);
}

#[tokio::test]
async fn test_environment_triggers_are_torn_down_with_the_old_key() {
    let engine = users();
    let focus = engine.signal("focus");
    let online = engine.signal("online");
    let (key, key_rx) = watch::channel(Some("user:1".to_string()));
    let _resource = bind(
        &engine,
        KeyResolver::watch(key_rx),
        ResourceOptions::new().environment(
            Environment::headless()
                .with_focus(focus.clone())
                .with_online(online.clone()),
        ),
    );
    settle().await;
    engine.clear_log();

    key.send_replace(Some("user:2".to_string()));
    settle().await;

    let log = engine.log();
    let last_unsubscribe = log
        .iter()
        .rposition(|line| line.starts_with("unsubscribe "))
        .unwrap();
    let first_subscribe = log
        .iter()
        .position(|line| line.starts_with("subscribe "))
        .unwrap();
    assert!(last_unsubscribe < first_subscribe, "log: {:?}", log);
    assert_eq!(engine.calls("unsubscribe ").len(), 7);
    assert_eq!(engine.calls("subscribe ").len(), 7);
    assert_eq!(engine.calls("unsubscribe focus").len(), 1);
    assert_eq!(engine.calls("unsubscribe online").len(), 1);
    assert_eq!(focus.subscriber_count(), 1);
    assert_eq!(online.subscriber_count(), 1);
}

#[tokio::test]
async fn test_key_switches_through_absent_and_back() {
    let engine = users();
    let (key, key_rx) = watch::channel(Some("user:1".to_string()));
    let resource = bind(&engine, KeyResolver::watch(key_rx), ResourceOptions::new());
    settle().await;
    assert_eq!(resource.value(), Some(user(1, "Alice")));

    key.send_replace(Some("user:2".to_string()));
    settle().await;
    assert_eq!(resource.value(), Some(user(2, "Bob")));
    assert_eq!(engine.subscribers("user:1"), 0);

    engine.clear_log();
    key.send_replace(None);
    settle().await;
    assert_eq!(resource.state(), ResourceState::Idle);
    assert_eq!(engine.subscribers("user:2"), 0);
    assert_eq!(engine.calls("unsubscribe user:2").len(), 5);
    assert!(engine.calls("subscribe").is_empty());
    assert!(engine.calls("query").is_empty());
    assert!(!resource.is_refetching());

    engine.clear_log();
    key.send_replace(Some("user:1".to_string()));
    settle().await;
    assert_eq!(engine.subscribers("user:1"), 5);
    assert_eq!(engine.calls("query user:1"), vec!["query user:1 stale=Some(true) fresh=None"]);
    assert_eq!(resource.value(), Some(user(1, "Alice")));
    assert_eq!(resource.state(), ResourceState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_late_result_of_superseded_key_is_dropped() {
    let engine = Arc::new(MemoryEngine::new(MemoryEngineConfig::default(), |key: String| async move {
        let delay = if key == "slow" { 500 } else { 10 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(key)
    }));
    let (key, key_rx) = watch::channel(Some("slow".to_string()));
    let resource = Resource::builder(KeyResolver::watch(key_rx))
        .options(ResourceOptions::new().engine(engine.clone()))
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    key.send_replace(Some("fast".to_string()));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(engine.peek("slow").as_deref(), Some("slow"));
    assert_eq!(resource.value().as_deref(), Some("fast"));
}

// ============================================================================
// Event-driven cells
// ============================================================================

#[tokio::test]
async fn test_refetching_follows_events() {
    let engine = users();
    let (key, key_rx) = watch::channel(Some("user:1".to_string()));
    let resource = bind(&engine, KeyResolver::watch(key_rx), ResourceOptions::new());
    settle().await;

    engine.emit("user:1", CacheEvent::Refetching);
    assert!(resource.is_refetching());
    assert_eq!(resource.state(), ResourceState::Refetching);

    engine.emit("user:1", CacheEvent::Resolved(user(1, "Alice v2")));
    assert!(!resource.is_refetching());
    assert_eq!(resource.value(), Some(user(1, "Alice v2")));

    engine.emit("user:1", CacheEvent::Refetching);
    engine.emit("user:1", CacheEvent::Error(CacheError::fetch("user:1", "timeout")));
    assert!(!resource.is_refetching());

    // A key change resets the flag even without a settling event.
    engine.emit("user:1", CacheEvent::Refetching);
    key.send_replace(Some("user:2".to_string()));
    settle().await;
    assert!(!resource.is_refetching());

    // Events for the old key no longer reach the resource.
    engine.emit("user:1", CacheEvent::Refetching);
    assert!(!resource.is_refetching());
}

#[tokio::test]
async fn test_mutate_updates_value_through_engine() {
    let engine = users();
    let resource = bind(&engine, KeyResolver::fixed("user:1"), ResourceOptions::new());
    settle().await;

    resource.mutate(Mutation::update(|previous: Option<&User>| {
        let mut next = previous.cloned().unwrap_or_else(|| user(1, ""));
        next.name = "Alicia".into();
        next
    }));
    assert_eq!(resource.value(), Some(user(1, "Alicia")));
    assert_eq!(engine.calls("mutate"), vec!["mutate user:1"]);
}

#[tokio::test]
async fn test_forget_keeps_value_by_default() {
    let engine = users();
    let resource = bind(&engine, KeyResolver::fixed("user:1"), ResourceOptions::new());
    settle().await;

    resource.forget();
    assert_eq!(engine.calls("forget"), vec!["forget user:1"]);
    assert_eq!(resource.value(), Some(user(1, "Alice")));
}

#[tokio::test]
async fn test_forget_clears_value_when_configured() {
    let engine = users();
    let resource = bind(
        &engine,
        KeyResolver::fixed("user:1"),
        ResourceOptions::new().clear_on_forget(true),
    );
    settle().await;

    engine.emit("user:1", CacheEvent::Forgotten);
    assert_eq!(resource.value(), None);
    assert_eq!(resource.state(), ResourceState::Loading);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_error_event_is_surfaced_once() {
    let engine = users();
    let (key, key_rx) = watch::channel(Some("user:1".to_string()));
    let resource = bind(&engine, KeyResolver::watch(key_rx), ResourceOptions::new());
    let mut errors = resource.take_errors().unwrap();
    assert!(resource.take_errors().is_none());
    settle().await;

    let boom = CacheError::fetch("user:1", "boom");
    engine.emit("user:1", CacheEvent::Error(boom.clone()));

    assert_eq!(resource.error(), Some(boom.clone()));
    assert_eq!(resource.state(), ResourceState::Error);
    assert_eq!(errors.try_recv().unwrap(), boom);
    assert!(errors.try_recv().is_err());

    // A new key starts without the previous key's error.
    key.send_replace(Some("user:2".to_string()));
    settle().await;
    assert_eq!(resource.error(), None);
    assert_eq!(resource.state(), ResourceState::Ready);
}

#[tokio::test]
async fn test_errors_before_take_stay_in_the_slot_only() {
    let engine = users();
    let resource = bind(&engine, KeyResolver::fixed("user:1"), ResourceOptions::new());
    settle().await;

    let early = CacheError::fetch("user:1", "early");
    engine.emit("user:1", CacheEvent::Error(early.clone()));
    assert_eq!(resource.error(), Some(early));

    let mut errors = resource.take_errors().unwrap();
    assert!(errors.try_recv().is_err());

    let late = CacheError::fetch("user:1", "late");
    engine.emit("user:1", CacheEvent::Error(late.clone()));
    assert_eq!(errors.try_recv().unwrap(), late);
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_host_receives_errors_and_disposes_resource() {
    let engine = users();
    let scope = Arc::new(Scope::new());
    let resource = Resource::builder(KeyResolver::fixed("user:1"))
        .options(ResourceOptions::new().engine(engine.clone()))
        .host(scope.clone())
        .build()
        .unwrap();
    settle().await;
    assert!(resource.take_errors().is_none());
    assert_eq!(scope.pending_teardowns(), 1);

    engine.emit("user:1", CacheEvent::Error(CacheError::fetch("user:1", "boom")));
    let captured = scope.take_errors();
    assert_eq!(captured, vec![CacheError::fetch("user:1", "boom")]);

    scope.close();
    assert!(resource.is_disposed());
    assert_eq!(engine.subscribers("user:1"), 0);
}

#[tokio::test]
async fn test_clear_error_resolves_again() {
    let engine = users();
    let resource = bind(&engine, KeyResolver::fixed("user:1"), ResourceOptions::new());
    settle().await;

    engine.emit("user:1", CacheEvent::Error(CacheError::fetch("user:1", "boom")));
    engine.clear_log();

    resource.clear_error();
    settle().await;
    assert_eq!(resource.error(), None);
    assert_eq!(engine.calls("query").len(), 1);
    assert_eq!(resource.state(), ResourceState::Ready);
}

// ============================================================================
// Explicit operations
// ============================================================================

#[tokio::test]
async fn test_refetch_merges_call_options_and_skips_absent_key() {
    let engine = users();
    let resource = bind(
        &engine,
        KeyResolver::fixed("user:2"),
        ResourceOptions::new().query(QueryOptions {
            remove_on_error: Some(true),
            ..Default::default()
        }),
    );
    settle().await;
    engine.clear_log();

    let value = resource.refetch(QueryOptions::fresh(true)).await.unwrap();
    assert_eq!(value, Some(user(2, "Bob")));
    assert_eq!(
        engine.calls("query"),
        vec!["query user:2 stale=Some(false) fresh=Some(true)"]
    );

    let absent = bind(&engine, KeyResolver::new(|| Ok(None)), ResourceOptions::new());
    engine.clear_log();
    assert_eq!(absent.refetch(QueryOptions::default()).await.unwrap(), None);
    absent.abort(Some("navigated away"));
    assert!(engine.log().is_empty());
}

#[tokio::test]
async fn test_refetch_error_is_returned() {
    let engine = users();
    let resource = bind(&engine, KeyResolver::fixed("user:404"), ResourceOptions::new());
    settle().await;

    let error = resource.refetch(QueryOptions::default()).await.unwrap_err();
    assert_eq!(error.to_string(), "fetch failed for key 'user:404': unknown key");
}

#[tokio::test]
async fn test_abort_forwards_reason() {
    let engine = users();
    let resource = bind(&engine, KeyResolver::fixed("user:1"), ResourceOptions::new());
    resource.abort(Some("navigated away"));
    assert_eq!(engine.calls("abort"), vec![r#"abort user:1 Some("navigated away")"#]);
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let engine = users();
    let resource = bind(&engine, KeyResolver::fixed("user:1"), ResourceOptions::new());
    settle().await;

    resource.dispose();
    resource.dispose();
    assert!(resource.is_disposed());
    assert_eq!(engine.calls("unsubscribe").len(), 5);

    engine.emit("user:1", CacheEvent::Mutated(user(1, "ghost")));
    assert_eq!(resource.value(), Some(user(1, "Alice")));

    resource.recompute_key();
    drop(resource);
    assert_eq!(engine.calls("unsubscribe").len(), 5);
}

// ============================================================================
// Environment triggers
// ============================================================================

#[tokio::test]
async fn test_focus_refetch_is_throttled() {
    let engine = users();
    let clock = ManualClock::default();
    let focus = Beacon::new();
    let resource = bind(
        &engine,
        KeyResolver::fixed("user:1"),
        ResourceOptions::new()
            .clock(Arc::new(clock.clone()))
            .environment(Environment::headless().with_focus(Arc::new(focus.clone())))
            .focus_interval(Duration::from_millis(5_000)),
    );
    settle().await;
    engine.clear_log();

    // Within the interval since creation
    clock.advance(Duration::from_millis(1_000));
    focus.fire();
    settle().await;
    assert!(engine.calls("query").is_empty());

    clock.advance(Duration::from_millis(4_001));
    focus.fire();
    focus.fire();
    settle().await;
    assert_eq!(
        engine.calls("query"),
        vec!["query user:1 stale=Some(false) fresh=None"]
    );
    assert_eq!(resource.last_focus(), clock.now_ms());
}

#[tokio::test]
async fn test_reconnect_refetches_unless_disabled() {
    let engine = users();
    let online = Beacon::new();
    let environment = Environment::headless().with_online(Arc::new(online.clone()));

    let enabled = bind(
        &engine,
        KeyResolver::fixed("user:1"),
        ResourceOptions::new().environment(environment.clone()),
    );
    let disabled = bind(
        &engine,
        KeyResolver::fixed("user:2"),
        ResourceOptions::new()
            .environment(environment)
            .refetch_on_connect(false),
    );
    settle().await;
    assert_eq!(online.subscriber_count(), 1);
    engine.clear_log();

    online.fire();
    online.fire();
    settle().await;
    assert_eq!(engine.calls("query user:1").len(), 2);
    assert!(engine.calls("query user:2").is_empty());

    enabled.dispose();
    disabled.dispose();
    assert_eq!(online.subscriber_count(), 0);
}

#[tokio::test]
async fn test_triggers_follow_the_current_key() {
    let engine = users();
    let online = Beacon::new();
    let (key, key_rx) = watch::channel(Some("user:1".to_string()));
    let _resource = bind(
        &engine,
        KeyResolver::watch(key_rx),
        ResourceOptions::new().environment(Environment::headless().with_online(Arc::new(online.clone()))),
    );
    settle().await;

    key.send_replace(None);
    settle().await;
    assert_eq!(online.subscriber_count(), 0);

    key.send_replace(Some("user:2".to_string()));
    settle().await;
    engine.clear_log();
    online.fire();
    settle().await;
    assert_eq!(engine.calls("query"), vec!["query user:2 stale=Some(false) fresh=None"]);
}

#[tokio::test]
async fn test_trigger_refetch_is_dropped_when_key_changes_first() {
    let engine = users();
    let online = Beacon::new();
    let (key, key_rx) = watch::channel(Some("user:1".to_string()));
    let resource = bind(
        &engine,
        KeyResolver::watch(key_rx),
        ResourceOptions::new().environment(Environment::headless().with_online(Arc::new(online.clone()))),
    );
    settle().await;
    engine.clear_log();

    // The refetch task is queued but has not run when the key moves on.
    online.fire();
    key.send_replace(Some("user:2".to_string()));
    resource.recompute_key();
    settle().await;

    assert_eq!(engine.calls("query"), vec!["query user:2 stale=Some(true) fresh=None"]);
    assert_eq!(resource.value(), Some(user(2, "Bob")));
}

#[tokio::test]
async fn test_reconnect_fetches_unexpired_key_from_origin() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let engine = Arc::new(MemoryEngine::new(
        MemoryEngineConfig {
            expiration: Duration::from_secs(60),
            ..Default::default()
        },
        move |key: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(user(n as u64, &key)) }
        },
    ));
    let online = Beacon::new();
    let resource = Resource::builder(KeyResolver::fixed("user:1"))
        .options(
            ResourceOptions::new()
                .engine(engine.clone())
                .environment(Environment::headless().with_online(Arc::new(online.clone()))),
        )
        .build()
        .unwrap();
    settle().await;
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    online.fire();
    settle().await;
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(resource.value(), Some(user(2, "user:1")));

    let refetched = resource.refetch(QueryOptions::default()).await.unwrap();
    assert_eq!(refetched, Some(user(3, "user:1")));
    assert_eq!(loads.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Trackers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_tracker_counts_down_to_expiration() {
    let engine = users();
    let clock = ManualClock::default();
    engine.set_expiration("user:1", clock.now_ms() + 1_000);

    let resource = bind(
        &engine,
        KeyResolver::fixed("user:1"),
        ResourceOptions::new().clock(Arc::new(clock.clone())),
    );
    let stale = resource.create_stale(Duration::from_millis(100));
    assert!(!stale.is_stale());
    assert_eq!(stale.stale_in(), 1_000);

    clock.advance(Duration::from_millis(1_001));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(stale.is_stale());
    assert_eq!(stale.stale_in(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_focus_tracker_reports_availability() {
    let engine = users();
    let clock = ManualClock::default();
    let resource = bind(
        &engine,
        KeyResolver::fixed("user:1"),
        ResourceOptions::new()
            .clock(Arc::new(clock.clone()))
            .focus_interval(Duration::from_millis(2_000)),
    );
    let focus = resource.create_focus_available(Duration::from_millis(100));
    assert!(!focus.is_available());
    assert_eq!(focus.available_in(), 2_000);

    clock.advance(Duration::from_millis(2_500));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(focus.is_available());
    assert_eq!(focus.available_in(), 0);
}

// ============================================================================
// Memory engine end to end
// ============================================================================

#[tokio::test]
async fn test_memory_engine_drives_resource() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let engine = Arc::new(MemoryEngine::new(MemoryEngineConfig::default(), move |key: String| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if key == "user:0" {
                return Err(CacheError::fetch(key, "no such user"));
            }
            Ok(user(n as u64, &key))
        }
    }));

    let (key, key_rx) = watch::channel(Some("user:1".to_string()));
    let resource = Resource::builder(KeyResolver::watch(key_rx))
        .options(ResourceOptions::new().engine(engine.clone()))
        .build()
        .unwrap();
    let mut errors = resource.take_errors().unwrap();
    settle().await;
    assert_eq!(resource.value(), Some(user(1, "user:1")));

    let fresh = resource.refetch(QueryOptions::fresh(true)).await.unwrap();
    assert_eq!(fresh, Some(user(2, "user:1")));
    assert_eq!(resource.value(), Some(user(2, "user:1")));

    key.send_replace(Some("user:0".to_string()));
    settle().await;
    assert_eq!(
        errors.recv().await.unwrap(),
        CacheError::fetch("user:0", "no such user")
    );
    assert_eq!(resource.state(), ResourceState::Error);
    assert_eq!(loads.load(Ordering::SeqCst), 3);
}
