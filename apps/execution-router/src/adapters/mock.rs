//! Scripted mock adapter for tests.
//!
//! Returns deterministic responses without touching the network. Failure
//! modes (refused connections, failing health checks, reported
//! disconnection) are toggled at runtime so routing and rollout tests can
//! script adapter behavior mid-flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::AdapterError;
use crate::models::{
    AccountInfo, Balance, ExecutionResult, MarketSnapshot, OrderRequest, OrderStatus,
};
use crate::resilience::SymbolPrecision;

use super::{AdapterHealth, ExecutionAdapter};

/// Mock execution adapter with scriptable behavior.
#[derive(Debug)]
pub struct MockAdapter {
    name: &'static str,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    healthy: AtomicBool,
    fail_health: AtomicBool,
    open_order_count: AtomicUsize,
    order_counter: AtomicU64,
    connect_calls: AtomicU64,
    submit_calls: AtomicU64,
    health_calls: AtomicU64,
}

impl MockAdapter {
    /// Create a mock with a fixed implementation name.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            fail_health: AtomicBool::new(false),
            open_order_count: AtomicUsize::new(0),
            order_counter: AtomicU64::new(1),
            connect_calls: AtomicU64::new(0),
            submit_calls: AtomicU64::new(0),
            health_calls: AtomicU64::new(0),
        }
    }

    /// Make subsequent `connect` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Script the health report: false makes the adapter look disconnected.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make `health` calls themselves fail.
    pub fn fail_health_checks(&self, fail: bool) {
        self.fail_health.store(fail, Ordering::SeqCst);
    }

    /// Script the number of open orders reported.
    pub fn set_open_orders(&self, count: usize) {
        self.open_order_count.store(count, Ordering::SeqCst);
    }

    /// Number of `connect` calls observed.
    #[must_use]
    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `submit_order` calls observed.
    #[must_use]
    pub fn submit_calls(&self) -> u64 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Number of `health` calls observed.
    #[must_use]
    pub fn health_calls(&self) -> u64 {
        self.health_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionAdapter for MockAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(AdapterError::Connection(format!(
                "{} refused connection",
                self.name
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<ExecutionResult, AdapterError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.order_counter.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionResult::filled(
            format!("{}-{id}", self.name),
            order.symbol.clone(),
            order.quantity,
            order.price.unwrap_or(dec!(100)),
            Decimal::ZERO,
        ))
    }

    async fn cancel_order(&self, _order_id: &str, _symbol: &str) -> Result<bool, AdapterError> {
        Ok(true)
    }

    async fn order_status(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<ExecutionResult, AdapterError> {
        let mut result = ExecutionResult::accepted(order_id, symbol);
        result.status = OrderStatus::Filled;
        Ok(result)
    }

    async fn open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<ExecutionResult>, AdapterError> {
        let count = self.open_order_count.load(Ordering::SeqCst);
        Ok((0..count)
            .map(|i| {
                ExecutionResult::accepted(format!("open-{i}"), symbol.unwrap_or("BTCUSDT"))
            })
            .collect())
    }

    async fn account_info(&self) -> Result<AccountInfo, AdapterError> {
        Ok(AccountInfo {
            balances: vec![Balance {
                asset: "USDT".to_string(),
                free: dec!(10000),
                locked: Decimal::ZERO,
            }],
            positions: vec![],
            equity: dec!(10000),
        })
    }

    async fn market_data(&self, symbol: &str) -> Result<MarketSnapshot, AdapterError> {
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            bid: dec!(99.9),
            ask: dec!(100.1),
            last: dec!(100),
            timestamp: Utc::now(),
        })
    }

    async fn symbol_info(&self, _symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        Ok(SymbolPrecision {
            step_size: dec!(0.001),
            tick_size: dec!(0.01),
            min_qty: dec!(0.001),
            max_qty: dec!(10000),
            min_notional: dec!(10),
            price_precision: 2,
            quantity_precision: 3,
        })
    }

    async fn precision_map(&self) -> Result<HashMap<String, (u32, u32)>, AdapterError> {
        Ok(HashMap::from([("BTCUSDT".to_string(), (2, 3))]))
    }

    fn adapter_name(&self) -> &'static str {
        self.name
    }

    async fn health(&self) -> Result<AdapterHealth, AdapterError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_health.load(Ordering::SeqCst) {
            return Err(AdapterError::Transport("health endpoint down".to_string()));
        }
        Ok(AdapterHealth {
            connected: self.healthy.load(Ordering::SeqCst) && self.is_connected(),
            open_orders: self.open_order_count.load(Ordering::SeqCst),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;

    #[tokio::test]
    async fn test_mock_fills_orders_sequentially() {
        let adapter = MockAdapter::new("mock");
        adapter.connect().await.unwrap();

        let order = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(1));
        let first = adapter.submit_order(&order).await.unwrap();
        let second = adapter.submit_order(&order).await.unwrap();

        assert_eq!(first.order_id, "mock-1");
        assert_eq!(second.order_id, "mock-2");
        assert_eq!(adapter.submit_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_refuses_connection_when_scripted() {
        let adapter = MockAdapter::new("mock");
        adapter.refuse_connections(true);

        assert!(adapter.connect().await.is_err());
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_mock_health_scripting() {
        let adapter = MockAdapter::new("mock");
        adapter.connect().await.unwrap();

        let health = adapter.health().await.unwrap();
        assert!(health.connected);

        adapter.set_healthy(false);
        let health = adapter.health().await.unwrap();
        assert!(!health.connected);

        adapter.fail_health_checks(true);
        assert!(adapter.health().await.is_err());
        assert_eq!(adapter.health_calls(), 3);
    }
}
