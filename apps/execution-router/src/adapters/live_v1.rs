//! Legacy live exchange adapter (API generation 1).
//!
//! A plain REST client with no internal fault tolerance: one request per
//! call, failures surface directly. Kept as the rollback target while
//! traffic migrates to [`super::LiveV2Adapter`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::error::AdapterError;
use crate::models::{AccountInfo, ExecutionResult, MarketSnapshot, OrderRequest};
use crate::resilience::SymbolPrecision;

use super::rest::{
    ExchangeConfig, RestClient, WireAccount, WireExchangeInfo, WireOrder, WireServerTime,
    WireTicker,
};
use super::{AdapterHealth, CallCounters, ExecutionAdapter};

const PATH_PREFIX: &str = "/api/v1";

/// Live exchange adapter, generation 1.
#[derive(Debug)]
pub struct LiveV1Adapter {
    client: RestClient,
    recv_window_ms: i64,
    connected: AtomicBool,
    counters: CallCounters,
}

impl LiveV1Adapter {
    /// Build the adapter from an exchange configuration.
    pub fn new(config: &ExchangeConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            client: RestClient::new(config, PATH_PREFIX)?,
            recv_window_ms: config.recv_window_ms,
            connected: AtomicBool::new(false),
            counters: CallCounters::default(),
        })
    }

    /// Verify the venue clock is within the receive window.
    async fn check_clock(&self) -> Result<(), AdapterError> {
        let server: WireServerTime = self.client.get("/time", &[]).await?;
        let skew_ms = (Utc::now().timestamp_millis() - server.server_time).abs();
        if skew_ms > self.recv_window_ms {
            return Err(AdapterError::TimestampSync { skew_ms });
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionAdapter for LiveV1Adapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        let result = async {
            let _: serde_json::Value = self.client.get("/ping", &[]).await?;
            self.check_clock().await
        }
        .await;

        match &result {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!(adapter = "live_v1", "Exchange connection established");
            }
            Err(error) => {
                tracing::error!(adapter = "live_v1", %error, "Exchange connection failed");
            }
        }
        self.counters.observe(result)
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!(adapter = "live_v1", "Exchange connection closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<ExecutionResult, AdapterError> {
        let body = json!({
            "symbol": order.symbol,
            "side": order.side,
            "type": order.order_type,
            "quantity": order.quantity,
            "price": order.price,
            "timeInForce": order.time_in_force,
            "clientOrderId": order.client_order_id,
        });
        let result = self
            .client
            .post::<WireOrder, _>("/order", &body)
            .await
            .map(ExecutionResult::from);
        self.counters.observe(result)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<bool, AdapterError> {
        let query = [
            ("orderId", order_id.to_string()),
            ("symbol", symbol.to_string()),
        ];
        let result = match self.client.delete::<WireOrder>("/order", &query).await {
            Ok(wire) => Ok(wire.status == crate::models::OrderStatus::Canceled),
            Err(AdapterError::OrderNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        };
        self.counters.observe(result)
    }

    async fn order_status(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<ExecutionResult, AdapterError> {
        let query = [
            ("orderId", order_id.to_string()),
            ("symbol", symbol.to_string()),
        ];
        let result = self
            .client
            .get::<WireOrder>("/order", &query)
            .await
            .map(ExecutionResult::from);
        self.counters.observe(result)
    }

    async fn open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<ExecutionResult>, AdapterError> {
        let query: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        let result = self
            .client
            .get::<Vec<WireOrder>>("/openOrders", &query)
            .await
            .map(|orders| orders.into_iter().map(ExecutionResult::from).collect());
        self.counters.observe(result)
    }

    async fn account_info(&self) -> Result<AccountInfo, AdapterError> {
        let result = self
            .client
            .get::<WireAccount>("/account", &[])
            .await
            .map(AccountInfo::from);
        self.counters.observe(result)
    }

    async fn market_data(&self, symbol: &str) -> Result<MarketSnapshot, AdapterError> {
        let query = [("symbol", symbol.to_string())];
        let result = self
            .client
            .get::<WireTicker>("/ticker", &query)
            .await
            .map(MarketSnapshot::from);
        self.counters.observe(result)
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        let query = [("symbol", symbol.to_string())];
        let result = self
            .client
            .get::<WireExchangeInfo>("/exchangeInfo", &query)
            .await
            .and_then(|info| {
                info.symbols
                    .into_iter()
                    .find(|s| s.symbol == symbol)
                    .map(SymbolPrecision::from)
                    .ok_or_else(|| AdapterError::Api {
                        code: "404".to_string(),
                        message: format!("unknown symbol {symbol}"),
                    })
            });
        self.counters.observe(result)
    }

    async fn precision_map(&self) -> Result<HashMap<String, (u32, u32)>, AdapterError> {
        let result = self
            .client
            .get::<WireExchangeInfo>("/exchangeInfo", &[])
            .await
            .map(|info| {
                info.symbols
                    .into_iter()
                    .map(|s| (s.symbol.clone(), (s.price_precision, s.quantity_precision)))
                    .collect()
            });
        self.counters.observe(result)
    }

    fn adapter_name(&self) -> &'static str {
        "live_v1"
    }

    async fn health(&self) -> Result<AdapterHealth, AdapterError> {
        let open_orders = if self.is_connected() {
            self.open_orders(None).await.map(|o| o.len()).unwrap_or(0)
        } else {
            0
        };
        let mut health = AdapterHealth {
            connected: self.is_connected(),
            open_orders,
            ..Default::default()
        };
        self.counters.fill_health(&mut health);
        Ok(health)
    }
}
