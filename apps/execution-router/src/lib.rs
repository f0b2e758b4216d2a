// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Execution Router - Rust Core Library
//!
//! Adapter resilience and canary rollout core for the Relay trading system.
//!
//! # Architecture
//!
//! Order execution is routed to one of several interchangeable backend
//! adapters. Operators move traffic between implementations gradually, with
//! live orders in flight, through a flag-driven factory and a phased
//! migration orchestrator. Dependency order, leaves first:
//!
//! - `resilience`: circuit breaker, retry with backoff, sliding-window rate
//!   limiter, precision cache - the per-call fault-tolerance primitives
//! - `flags`: environment-scoped feature flags with deterministic
//!   percentage rollout and typed change events
//! - `adapters`: the `ExecutionAdapter` port and its implementations
//!   (live exchange v1, live exchange v2, paper simulator)
//! - `routing`: the adapter factory (selection, caching, graceful hot-swap)
//!   and the health monitor that feeds rollout decisions
//! - `migration`: the canary-rollout state machine (testnet validation,
//!   canary, stepped rollout, automatic rollback)
//!
//! Services are constructed explicitly at the composition root (`main.rs`)
//! and passed by reference - no global singletons.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Execution adapter port and implementations.
pub mod adapters;

/// Configuration loading and validation.
pub mod config;

/// Error taxonomy for adapter calls.
pub mod error;

/// Feature flags with percentage rollout.
pub mod flags;

/// Phased canary-rollout orchestration.
pub mod migration;

/// Domain types shared across adapters and routing.
pub mod models;

/// Prometheus metrics.
pub mod observability;

/// Per-call fault-tolerance primitives.
pub mod resilience;

/// Adapter selection, hot-swap and health monitoring.
pub mod routing;

/// Tracing setup.
pub mod telemetry;

// Re-exports of the crate's primary surface.
pub use adapters::{
    AdapterHealth, ExchangeConfig, ExecutionAdapter, LiveV1Adapter, LiveV2Adapter, MockAdapter,
    PaperAdapter,
};
pub use error::AdapterError;
pub use flags::{
    EXECUTION_IMPL_FLAG, Environment, FeatureFlag, FeatureFlagManager, FlagChange, FlagStore,
    FlagValue,
};
pub use migration::{
    MigrationError, MigrationOrchestrator, MigrationPhase, MigrationSettings, MigrationState,
    MigrationStateStore,
};
pub use models::{ExecutionResult, OrderRequest, OrderSide, OrderStatus, OrderType};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, PrecisionMapper, RateLimiter, RetryPolicy,
};
pub use routing::{AdapterFactory, AdapterHealthMonitor, HealthRecord, HealthState};
