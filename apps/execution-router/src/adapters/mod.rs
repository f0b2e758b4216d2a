//! Execution adapter port and its implementations.
//!
//! An adapter is an opaque implementation of the order-execution surface:
//! the router selects, protects and swaps implementations, it never reasons
//! about venue protocol details.
//!
//! | Implementation | Type | Notes |
//! |----------------|------|-------|
//! | `paper` | [`PaperAdapter`] | in-memory simulator, immediate fills |
//! | `live_v1` | [`LiveV1Adapter`] | legacy REST client, no internal resilience |
//! | `live_v2` | [`LiveV2Adapter`] | REST client wrapped in breaker/retry/rate-limit |
//! | `mock` | [`MockAdapter`] | scripted adapter for tests |

mod live_v1;
mod live_v2;
mod mock;
mod paper;
mod rest;

pub use live_v1::LiveV1Adapter;
pub use live_v2::LiveV2Adapter;
pub use mock::MockAdapter;
pub use paper::PaperAdapter;
pub use rest::ExchangeConfig;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::models::{AccountInfo, ExecutionResult, MarketSnapshot, OrderRequest};
use crate::resilience::SymbolPrecision;

/// Health details an adapter reports about itself.
///
/// A typed struct rather than a string map so health classification does not
/// depend on parsing free-form keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterHealth {
    /// Whether the adapter currently holds a live connection.
    pub connected: bool,
    /// Fraction of recent calls that failed, 0.0..=1.0.
    pub error_rate: f64,
    /// Number of orders the adapter believes are open.
    pub open_orders: usize,
    /// Total calls served since construction.
    pub requests_total: u64,
    /// Total failed calls since construction.
    pub request_failures: u64,
    /// Most recent error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Port implemented by every execution backend.
///
/// Implementations must be cheap to share (`Arc`) and safe for concurrent
/// order submissions.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Establish the venue connection.
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Tear down the venue connection.
    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Whether the adapter is currently connected.
    fn is_connected(&self) -> bool;

    /// Submit an order.
    ///
    /// Business rejections come back as a failed [`ExecutionResult`];
    /// transport failures as an [`AdapterError`].
    async fn submit_order(&self, order: &OrderRequest) -> Result<ExecutionResult, AdapterError>;

    /// Cancel an order. Returns false when the order was not cancelable.
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<bool, AdapterError>;

    /// Query the current state of an order.
    async fn order_status(&self, order_id: &str, symbol: &str)
    -> Result<ExecutionResult, AdapterError>;

    /// List open orders, optionally filtered by symbol.
    async fn open_orders(&self, symbol: Option<&str>)
    -> Result<Vec<ExecutionResult>, AdapterError>;

    /// Account balances, positions and equity.
    async fn account_info(&self) -> Result<AccountInfo, AdapterError>;

    /// Top-of-book quote for a symbol.
    async fn market_data(&self, symbol: &str) -> Result<MarketSnapshot, AdapterError>;

    /// Rounding rules for a symbol.
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError>;

    /// `symbol -> (price_precision, quantity_precision)` for all known symbols.
    async fn precision_map(&self) -> Result<HashMap<String, (u32, u32)>, AdapterError>;

    /// Stable implementation name, used as the flag value and cache key.
    fn adapter_name(&self) -> &'static str;

    /// Self-reported health details.
    async fn health(&self) -> Result<AdapterHealth, AdapterError>;
}

/// Rolling call counters shared by adapter implementations.
///
/// Feeds the `error_rate` in [`AdapterHealth`].
#[derive(Debug, Default)]
pub(crate) struct CallCounters {
    total: AtomicU64,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl CallCounters {
    pub(crate) fn record_ok(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_err(&self, error: &AdapterError) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut last = self
            .last_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Some(error.to_string());
    }

    /// Track a finished call and pass the result through.
    pub(crate) fn observe<T>(
        &self,
        result: Result<T, AdapterError>,
    ) -> Result<T, AdapterError> {
        match &result {
            Ok(_) => self.record_ok(),
            Err(err) => self.record_err(err),
        }
        result
    }

    pub(crate) fn fill_health(&self, health: &mut AdapterHealth) {
        let total = self.total.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        health.requests_total = total;
        health.request_failures = failures;
        health.error_rate = if total == 0 {
            0.0
        } else {
            failures as f64 / total as f64
        };
        health.last_error = self
            .last_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_error_rate() {
        let counters = CallCounters::default();
        counters.record_ok();
        counters.record_ok();
        counters.record_ok();
        counters.record_err(&AdapterError::Transport("reset".to_string()));

        let mut health = AdapterHealth::default();
        counters.fill_health(&mut health);
        assert_eq!(health.requests_total, 4);
        assert_eq!(health.request_failures, 1);
        assert!((health.error_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(health.last_error.as_deref(), Some("transport error: reset"));
    }

    #[test]
    fn test_counters_empty_rate_is_zero() {
        let counters = CallCounters::default();
        let mut health = AdapterHealth::default();
        counters.fill_health(&mut health);
        assert!(health.error_rate.abs() < f64::EPSILON);
    }
}
