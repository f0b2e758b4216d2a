//! Execution Router Binary
//!
//! Starts the Relay execution router: loads flags, wires the adapter
//! factory and health monitor, and serves the selected adapter until
//! shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin execution-router
//! ```
//!
//! # Environment Variables
//!
//! ## Required for live implementations
//! - `EXCHANGE_API_KEY`: exchange API key
//! - `EXCHANGE_API_SECRET`: exchange API secret
//!
//! ## Optional
//! - `EXCHANGE_TESTNET`: route live adapters at the exchange testnet
//! - `ROUTER_CONFIG`: configuration file path (default: config.yaml)
//! - `RUST_LOG`: log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::broadcast;

use execution_router::adapters::{
    ExchangeConfig, LiveV1Adapter, LiveV2Adapter, PaperAdapter,
};
use execution_router::config::{Config, load_config};
use execution_router::flags::{FeatureFlagManager, FlagStore};
use execution_router::migration::{MigrationOrchestrator, MigrationPhase, MigrationStateStore};
use execution_router::observability::{MetricsConfig, init_metrics};
use execution_router::routing::{AdapterFactory, AdapterHealthMonitor};
use execution_router::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _telemetry = init_telemetry();

    let config_path = std::env::var("ROUTER_CONFIG").ok();
    let config = load_config(config_path.as_deref()).context("loading configuration")?;
    let environment = config.environment.parse_environment()?;

    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_addr
            .parse()
            .context("parsing metrics address")?;
        if let Err(error) = init_metrics(&MetricsConfig {
            listen_addr: addr,
            ..Default::default()
        }) {
            tracing::warn!(%error, "Metrics exporter not started");
        }
    }

    // Flags: persisted store merged over built-in defaults.
    let flags = Arc::new(FeatureFlagManager::new(
        environment,
        FlagStore::new(&config.flags.path),
    ));
    match flags.load() {
        Ok(count) => tracing::info!(loaded = count, "Flag store loaded"),
        Err(error) => tracing::warn!(%error, "Flag store unavailable, using defaults"),
    }

    let monitor = Arc::new(AdapterHealthMonitor::new());
    let factory = Arc::new(build_factory(&config, &flags, &monitor));
    let _flag_listener = factory.spawn_flag_listener();

    // Resolve the initial adapter so startup fails loudly on a bad flag.
    let adapter = factory
        .get_adapter(None)
        .await
        .context("resolving initial execution adapter")?;
    tracing::info!(
        implementation = adapter.adapter_name(),
        environment = %environment,
        "Execution router ready"
    );

    // The orchestrator resumes automatically from its persisted phase; a
    // mid-flight migration is reported for the operator.
    let orchestrator = MigrationOrchestrator::new(
        Arc::clone(&flags),
        Arc::clone(&factory),
        Arc::clone(&monitor),
        MigrationStateStore::new(&config.migration.state_path),
        config.migration.to_settings(),
    )?;
    let migration_state = orchestrator.state();
    if migration_state.phase != MigrationPhase::NotStarted {
        tracing::warn!(
            phase = %migration_state.phase,
            rollbacks = migration_state.rollback_count,
            "Migration in progress; resume it via the operator tooling"
        );
    }
    let cancel_migrations = orchestrator.cancellation_token();

    // Background health polling.
    let (shutdown_tx, _) = broadcast::channel(1);
    let health_handle = {
        let monitor = Arc::clone(&monitor);
        let interval = Duration::from_secs(config.health.check_interval_secs);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            monitor.run(interval, shutdown_rx).await;
        })
    };

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("Shutdown signal received");

    cancel_migrations.cancel();
    let _ = shutdown_tx.send(());
    let _ = health_handle.await;

    factory.cleanup().await;
    if let Err(error) = flags.save() {
        tracing::warn!(%error, "Final flag save failed");
    }

    tracing::info!("Execution router stopped");
    Ok(())
}

/// Register every known implementation with the factory.
///
/// Live builders read credentials lazily, so a paper-only deployment runs
/// without exchange keys.
fn build_factory(
    config: &Config,
    flags: &Arc<FeatureFlagManager>,
    monitor: &Arc<AdapterHealthMonitor>,
) -> AdapterFactory {
    let mut factory = AdapterFactory::new(Arc::clone(flags), Arc::clone(monitor));

    factory.register_builder("paper", || Ok(Arc::new(PaperAdapter::default())));

    factory.register_builder("live_v1", || {
        let exchange = ExchangeConfig::from_env()?;
        Ok(Arc::new(LiveV1Adapter::new(&exchange)?))
    });

    let resilience = config.resilience.clone();
    factory.register_builder("live_v2", move || {
        let exchange = ExchangeConfig::from_env()?;
        let adapter = LiveV2Adapter::new(&exchange)?
            .with_retry_policy(resilience.retry.to_policy())
            .with_circuit_config(resilience.circuit_breaker.to_config())
            .with_rate_limit(
                resilience.rate_limit.max_requests,
                Duration::from_secs(resilience.rate_limit.window_secs),
            );
        Ok(Arc::new(adapter))
    });

    factory
}
