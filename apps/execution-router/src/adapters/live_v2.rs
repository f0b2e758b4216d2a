//! Live exchange adapter, generation 2.
//!
//! Same wire surface as [`super::LiveV1Adapter`], wrapped in the full
//! resilience stack. Composition, outermost first:
//!
//! ```text
//! circuit breaker → retry with backoff → rate limiter → HTTP call
//! ```
//!
//! The breaker sits outside the retry so an exhausted retry run counts as a
//! single breaker failure. Order quantities and prices are rounded through
//! the precision cache before submission; the cache refreshes itself from
//! exchange metadata when stale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::error::AdapterError;
use crate::models::{AccountInfo, ExecutionResult, MarketSnapshot, OrderRequest, OrderStatus};
use crate::observability;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerSnapshot,
    PrecisionMapper, RateLimiter, RetryPolicy, SymbolPrecision, with_retry_if,
};

use super::rest::{
    ExchangeConfig, RestClient, WireAccount, WireExchangeInfo, WireOrder, WireServerTime,
    WireTicker,
};
use super::{AdapterHealth, CallCounters, ExecutionAdapter};

const PATH_PREFIX: &str = "/api/v2";

/// Default request budget against the venue: 10 calls per second.
const DEFAULT_MAX_REQUESTS: usize = 10;
const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Live exchange adapter, generation 2, with internal fault tolerance.
#[derive(Debug)]
pub struct LiveV2Adapter {
    client: RestClient,
    recv_window_ms: i64,
    connected: AtomicBool,
    counters: CallCounters,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    precision: PrecisionMapper,
}

impl LiveV2Adapter {
    /// Build the adapter from an exchange configuration with default
    /// resilience settings.
    pub fn new(config: &ExchangeConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            client: RestClient::new(config, PATH_PREFIX)?,
            recv_window_ms: config.recv_window_ms,
            connected: AtomicBool::new(false),
            counters: CallCounters::default(),
            retry: RetryPolicy::default(),
            breaker: CircuitBreaker::new("live_v2", CircuitBreakerConfig::live_v2()),
            limiter: RateLimiter::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW),
            precision: PrecisionMapper::default(),
        })
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the circuit breaker configuration.
    #[must_use]
    pub fn with_circuit_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new("live_v2", config);
        self
    }

    /// Override the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.limiter = RateLimiter::new(max_requests, window);
        self
    }

    /// Current circuit breaker snapshot.
    #[must_use]
    pub fn circuit_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Run one logical exchange call behind the full resilience stack.
    async fn guarded<T, F, Fut>(&self, label: &'static str, op: F) -> Result<T, AdapterError>
    where
        T: Send,
        F: Fn() -> Fut + Sync,
        Fut: std::future::Future<Output = Result<T, AdapterError>> + Send,
    {
        let started = Instant::now();
        // Borrow `op` so the inner closure captures a `Copy` reference and
        // stays callable across retries (an owning move would make it
        // `AsyncFnOnce`).
        let op = &op;
        // Each closure hands the resilience helpers an explicitly-typed
        // boxed `Send` future. This pins the future type concretely so the
        // helpers' `impl Future` stays `Send` without a higher-ranked
        // obligation on the closures' associated future types.
        type GuardedFut<'a, T> =
            std::pin::Pin<Box<dyn std::future::Future<Output = Result<T, AdapterError>> + Send + 'a>>;
        let outcome = self
            .breaker
            .call(|| -> GuardedFut<'_, T> {
                Box::pin(async move {
                    with_retry_if(&self.retry, label, AdapterError::is_retryable, || -> GuardedFut<'_, T> {
                        Box::pin(async move {
                            self.limiter.acquire().await;
                            op().await
                        })
                    })
                    .await
                })
            })
            .await;

        let result = match outcome {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open { name, retry_in }) => {
                Err(AdapterError::CircuitOpen { name, retry_in })
            }
            Err(CircuitBreakerError::Inner(err)) => Err(err),
        };

        observability::record_adapter_call(
            "live_v2",
            label,
            result.is_ok(),
            started.elapsed(),
        );
        self.counters.observe(result)
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

    /// Refresh the precision cache from exchange metadata when stale.
    async fn refresh_precision(&self, symbol: &str) {
        if !self.precision.needs_update() {
            return;
        }

        let query = [("symbol", symbol.to_string())];
        let query = &query;
        let fetched = self
            .guarded("exchange_info", || async move {
                self.client.get::<WireExchangeInfo>("/exchangeInfo", query).await
            })
            .await;

        match fetched {
            Ok(info) => {
                for wire in info.symbols {
                    let symbol = wire.symbol.clone();
                    self.precision.update_cache(symbol, wire.into());
                }
            }
            Err(error) => {
                // Stale rounding rules beat no order flow; the venue will
                // reject anything misaligned.
                tracing::warn!(adapter = "live_v2", %error, "Precision refresh failed");
            }
        }
    }
}

#[async_trait]
impl ExecutionAdapter for LiveV2Adapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        let result = self
            .guarded("connect", || async move {
                let _: serde_json::Value = self.client.get("/ping", &[]).await?;
                self.check_clock().await
            })
            .await;

        match &result {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!(adapter = "live_v2", "Exchange connection established");
            }
            Err(error) => {
                tracing::error!(adapter = "live_v2", %error, "Exchange connection failed");
            }
        }
        result
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!(adapter = "live_v2", "Exchange connection closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<ExecutionResult, AdapterError> {
        self.refresh_precision(&order.symbol).await;

        let quantity = self.precision.format_quantity(&order.symbol, order.quantity);
        let price = order
            .price
            .map(|p| self.precision.format_price(&order.symbol, p));

        let body = json!({
            "symbol": order.symbol,
            "side": order.side,
            "type": order.order_type,
            "quantity": quantity,
            "price": price,
            "timeInForce": order.time_in_force,
            "clientOrderId": order.client_order_id,
        });
        let body = &body;

        self.guarded("submit_order", || async move {
            self.client
                .post::<WireOrder, _>("/order", body)
                .await
                .map(ExecutionResult::from)
        })
        .await
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<bool, AdapterError> {
        let query = [
            ("orderId", order_id.to_string()),
            ("symbol", symbol.to_string()),
        ];
        let query = &query;
        let outcome = self
            .guarded("cancel_order", || async move {
                self.client
                    .delete::<WireOrder>("/order", query)
                    .await
                    .map(|wire| wire.status == OrderStatus::Canceled)
            })
            .await;

        match outcome {
            Err(AdapterError::OrderNotFound(_)) => Ok(false),
            other => other,
        }
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
        let query = &query;
        self.guarded("order_status", || async move {
            self.client
                .get::<WireOrder>("/order", query)
                .await
                .map(ExecutionResult::from)
        })
        .await
    }

    async fn open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<ExecutionResult>, AdapterError> {
        let query: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        let query = &query;
        self.guarded("open_orders", || async move {
            self.client
                .get::<Vec<WireOrder>>("/openOrders", query)
                .await
                .map(|orders| orders.into_iter().map(ExecutionResult::from).collect())
        })
        .await
    }

    async fn account_info(&self) -> Result<AccountInfo, AdapterError> {
        self.guarded("account_info", || async move {
            self.client
                .get::<WireAccount>("/account", &[])
                .await
                .map(AccountInfo::from)
        })
        .await
    }

    async fn market_data(&self, symbol: &str) -> Result<MarketSnapshot, AdapterError> {
        let query = [("symbol", symbol.to_string())];
        let query = &query;
        self.guarded("market_data", || async move {
            self.client
                .get::<WireTicker>("/ticker", query)
                .await
                .map(MarketSnapshot::from)
        })
        .await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        let query = [("symbol", symbol.to_string())];
        let query = &query;
        self.guarded("symbol_info", || async move {
            self.client
                .get::<WireExchangeInfo>("/exchangeInfo", query)
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
                })
        })
        .await
    }

    async fn precision_map(&self) -> Result<HashMap<String, (u32, u32)>, AdapterError> {
        if self.precision.needs_update() {
            self.refresh_precision("").await;
        }
        Ok(self.precision.precision_map())
    }

    fn adapter_name(&self) -> &'static str {
        "live_v2"
    }

    async fn health(&self) -> Result<AdapterHealth, AdapterError> {
        let mut health = AdapterHealth {
            connected: self.is_connected(),
            ..Default::default()
        };
        self.counters.fill_health(&mut health);

        let circuit = self.breaker.snapshot();
        if circuit.state != crate::resilience::CircuitState::Closed {
            health.last_error = Some(format!("circuit breaker {}", circuit.state));
        }
        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_rejects_empty_credentials() {
        let config = ExchangeConfig::new("", "", true);
        assert!(LiveV2Adapter::new(&config).is_err());
    }

    #[test]
    fn test_adapter_name() {
        let config = ExchangeConfig::new("key", "secret", true);
        let adapter = LiveV2Adapter::new(&config).unwrap();
        assert_eq!(adapter.adapter_name(), "live_v2");
        assert!(!adapter.is_connected());
    }

    #[test]
    fn test_builders_replace_components() {
        let config = ExchangeConfig::new("key", "secret", true);
        let adapter = LiveV2Adapter::new(&config)
            .unwrap()
            .with_retry_policy(RetryPolicy::conservative())
            .with_circuit_config(CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(5),
            })
            .with_rate_limit(2, Duration::from_secs(1));

        assert_eq!(adapter.retry.max_attempts, 3);
        assert_eq!(adapter.circuit_snapshot().failure_count, 0);
    }
}
