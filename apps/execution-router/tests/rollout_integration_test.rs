//! End-to-end tests for adapter routing and canary rollout.
//!
//! Wires the real flag manager, factory, health monitor and orchestrator
//! together with file-backed stores, and drives the rollout scenarios an
//! operator would: select an implementation, saturate the rate limit, trip
//! a breaker, and watch an unhealthy canary roll itself back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal_macros::dec;

use execution_router::adapters::MockAdapter;
use execution_router::flags::{
    EXECUTION_IMPL_FLAG, Environment, FeatureFlagManager, FlagStore, FlagValue,
};
use execution_router::migration::{
    MigrationError, MigrationOrchestrator, MigrationPhase, MigrationSettings, MigrationStateStore,
};
use execution_router::models::{OrderRequest, OrderSide};
use execution_router::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};
use execution_router::routing::{AdapterFactory, AdapterHealthMonitor};
use execution_router::{AdapterError, PaperAdapter};

struct Stack {
    flags: Arc<FeatureFlagManager>,
    factory: Arc<AdapterFactory>,
    monitor: Arc<AdapterHealthMonitor>,
    new_adapter: Arc<MockAdapter>,
    dir: tempfile::TempDir,
}

/// Full wiring with a paper adapter and two scriptable mocks.
fn build_stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let flags = Arc::new(FeatureFlagManager::new(
        Environment::Staging,
        FlagStore::new(dir.path().join("flags.json")),
    ));
    let monitor = Arc::new(AdapterHealthMonitor::new());

    let new_adapter = Arc::new(MockAdapter::new("live_next"));
    let old_adapter = Arc::new(MockAdapter::new("live_prev"));

    let mut factory = AdapterFactory::new(Arc::clone(&flags), Arc::clone(&monitor));
    factory.register_builder("paper", || Ok(Arc::new(PaperAdapter::default())));
    let new_clone = Arc::clone(&new_adapter);
    factory.register_builder("live_next", move || Ok(new_clone.clone()));
    let old_clone = Arc::clone(&old_adapter);
    factory.register_builder("live_prev", move || Ok(old_clone.clone()));

    Stack {
        flags,
        factory: Arc::new(factory),
        monitor,
        new_adapter,
        dir,
    }
}

fn fast_migration_settings() -> MigrationSettings {
    MigrationSettings {
        new_impl: "live_next".to_string(),
        old_impl: "live_prev".to_string(),
        canary_percentage: 10,
        rollout_steps: vec![25, 50, 75, 100],
        poll_interval: Duration::from_millis(10),
        max_unhealthy: 5,
        testnet_soak: Duration::from_millis(100),
        canary_soak: Duration::from_millis(150),
        step_soak: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn paper_flag_routes_to_paper_adapter() {
    let stack = build_stack();
    stack.flags.set(EXECUTION_IMPL_FLAG, FlagValue::from("paper"));
    stack.flags.enable(EXECUTION_IMPL_FLAG, 100);

    let adapter = stack.factory.get_adapter(None).await.unwrap();
    assert_eq!(adapter.adapter_name(), "paper");

    // The adapter is live: orders actually execute.
    let paper = stack.factory.get_adapter(None).await.unwrap();
    assert!(Arc::ptr_eq(&adapter, &paper));
}

#[tokio::test]
async fn paper_adapter_executes_orders_end_to_end() {
    let stack = build_stack();
    let adapter = stack.factory.get_adapter(None).await.unwrap();
    assert_eq!(adapter.adapter_name(), "paper");

    // No mark yet: market order is a business rejection, not an error.
    let order = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(1));
    let result = adapter.submit_order(&order).await.unwrap();
    assert!(!result.success);
}

#[tokio::test]
async fn third_acquire_blocks_until_window_slides() {
    let limiter = RateLimiter::new(2, Duration::from_millis(300));

    limiter.acquire().await;
    limiter.acquire().await;

    let start = Instant::now();
    limiter.acquire().await;
    let waited = start.elapsed();

    assert!(
        waited >= Duration::from_millis(250),
        "third acquire should wait close to the full window, waited {waited:?}"
    );
}

#[tokio::test]
async fn breaker_rejects_fourth_call_without_invoking() {
    let breaker = CircuitBreaker::new(
        "integration",
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(300),
        },
    );
    let mut invocations = 0u32;

    for _ in 0..3 {
        let result: Result<(), _> = breaker
            .call(|| {
                invocations += 1;
                async { Err::<(), _>("venue down") }
            })
            .await;
        assert!(result.is_err());
    }

    let result: Result<(), _> = breaker
        .call(|| {
            invocations += 1;
            async { Ok(()) }
        })
        .await;

    assert!(matches!(
        result,
        Err(execution_router::resilience::CircuitBreakerError::Open { .. })
    ));
    assert_eq!(invocations, 3, "wrapped function must not run while open");
}

#[tokio::test]
async fn unhealthy_canary_rolls_back_and_persists() {
    let stack = build_stack();
    let state_path = stack.dir.path().join("migration.json");
    let orchestrator = MigrationOrchestrator::new(
        Arc::clone(&stack.flags),
        Arc::clone(&stack.factory),
        Arc::clone(&stack.monitor),
        MigrationStateStore::new(&state_path),
        fast_migration_settings(),
    )
    .unwrap();

    orchestrator.start_migration().unwrap();
    assert!(orchestrator.deploy_testnet().await.unwrap());
    orchestrator.validate_testnet().unwrap();

    // Canary goes unhealthy: six consecutive bad checks exceed the
    // tolerance of five and force a rollback.
    stack.new_adapter.set_healthy(false);
    let result = orchestrator.run_production_rollout().await;
    assert!(matches!(result, Err(MigrationError::Validation(_))));

    let state = orchestrator.state();
    assert_eq!(state.phase, MigrationPhase::RolledBack);
    assert_eq!(state.rollback_count, 1);

    // Traffic is back on the previous implementation at 100%.
    let flag = stack.flags.flag(EXECUTION_IMPL_FLAG).unwrap();
    assert_eq!(flag.value, FlagValue::from("live_prev"));
    assert_eq!(flag.rollout_percentage, 100);

    // The rolled-back phase survived to disk.
    let raw = std::fs::read_to_string(&state_path).unwrap();
    let on_disk: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk["phase"], "rolled_back");
    assert_eq!(on_disk["rollbackCount"], 1);
    assert!(on_disk["healthChecks"].as_array().is_some());
}

#[tokio::test]
async fn healthy_migration_completes_and_switches_traffic() {
    let stack = build_stack();
    let orchestrator = MigrationOrchestrator::new(
        Arc::clone(&stack.flags),
        Arc::clone(&stack.factory),
        Arc::clone(&stack.monitor),
        MigrationStateStore::new(stack.dir.path().join("migration.json")),
        fast_migration_settings(),
    )
    .unwrap();

    orchestrator.start_migration().unwrap();
    assert!(orchestrator.deploy_testnet().await.unwrap());
    orchestrator.validate_testnet().unwrap();
    orchestrator.run_production_rollout().await.unwrap();

    assert_eq!(orchestrator.state().phase, MigrationPhase::Completed);

    // The factory now serves the new implementation.
    let adapter = stack.factory.get_adapter(None).await.unwrap();
    assert_eq!(adapter.adapter_name(), "live_next");
}

#[tokio::test]
async fn flag_change_swaps_adapter_for_in_flight_traffic() {
    let stack = build_stack();
    let _listener = stack.factory.spawn_flag_listener();

    let before = stack.factory.get_adapter(None).await.unwrap();
    assert_eq!(before.adapter_name(), "paper");

    stack
        .flags
        .set(EXECUTION_IMPL_FLAG, FlagValue::from("live_next"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = stack.factory.get_adapter(None).await.unwrap();
    assert_eq!(after.adapter_name(), "live_next");

    // The swap is auditable.
    let events = stack.factory.switch_events();
    assert!(!events.is_empty());
    assert_eq!(events.last().unwrap().to, "live_next");
}

#[tokio::test]
async fn unknown_implementation_surfaces_connection_error() {
    let stack = build_stack();
    stack
        .flags
        .set(EXECUTION_IMPL_FLAG, FlagValue::from("does_not_exist"));

    let result = stack.factory.get_adapter(None).await;
    assert!(matches!(result, Err(AdapterError::Connection(_))));
}

#[tokio::test]
async fn percentage_rollout_splits_subjects_deterministically() {
    let stack = build_stack();
    stack
        .flags
        .set(EXECUTION_IMPL_FLAG, FlagValue::from("live_next"));
    stack.flags.enable(EXECUTION_IMPL_FLAG, 50);

    let mut included = 0usize;
    let mut excluded = 0usize;
    for i in 0..200 {
        let subject = format!("acct-{i}");
        let adapter = stack.factory.get_adapter(Some(&subject)).await.unwrap();
        match adapter.adapter_name() {
            "live_next" => included += 1,
            "paper" => excluded += 1,
            other => panic!("unexpected adapter {other}"),
        }
    }

    // Deterministic bucketing splits subjects both ways at 50%.
    assert!(included > 0, "some subjects must be included at 50%");
    assert!(excluded > 0, "some subjects must be excluded at 50%");
    assert_eq!(included + excluded, 200);

    // The same subject resolves identically on every call.
    let first = stack
        .factory
        .get_adapter(Some("acct-7"))
        .await
        .unwrap()
        .adapter_name();
    for _ in 0..10 {
        let again = stack
            .factory
            .get_adapter(Some("acct-7"))
            .await
            .unwrap()
            .adapter_name();
        assert_eq!(first, again);
    }
}
