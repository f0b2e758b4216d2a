//! Shared REST plumbing for the live exchange adapters.
//!
//! Wire-format fidelity is not the router's concern — both live adapter
//! generations speak the same simple JSON surface and differ only in path
//! version and in how calls are protected. Credentials and the testnet
//! toggle come from environment variables and are passed through untouched.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::AdapterError;
use crate::models::{
    AccountInfo, Balance, ExecutionResult, MarketSnapshot, OrderStatus, Position,
};
use crate::resilience::SymbolPrecision;

/// Environment variable holding the exchange API key.
pub const API_KEY_VAR: &str = "EXCHANGE_API_KEY";
/// Environment variable holding the exchange API secret.
pub const API_SECRET_VAR: &str = "EXCHANGE_API_SECRET";
/// Environment variable toggling the exchange testnet ("1"/"true").
pub const TESTNET_VAR: &str = "EXCHANGE_TESTNET";

const MAINNET_BASE_URL: &str = "https://api.relay-exchange.io";
const TESTNET_BASE_URL: &str = "https://testnet.relay-exchange.io";

/// API error code the venue uses for timestamp-outside-recv-window.
const TIMESTAMP_SKEW_CODE: &str = "-1021";

/// API error code the venue uses for insufficient account balance.
const INSUFFICIENT_BALANCE_CODE: &str = "-2010";

/// API error code the venue uses for an unknown order id.
const UNKNOWN_ORDER_CODE: &str = "-2011";

/// Configuration for a live exchange adapter.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Base URL of the REST API.
    pub base_url: String,
    /// Whether this points at the exchange testnet.
    pub testnet: bool,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Tolerated clock skew for signed requests, in milliseconds.
    pub recv_window_ms: i64,
}

impl ExchangeConfig {
    /// Create a configuration with explicit credentials.
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, testnet: bool) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url: if testnet {
                TESTNET_BASE_URL.to_string()
            } else {
                MAINNET_BASE_URL.to_string()
            },
            testnet,
            timeout: Duration::from_secs(10),
            recv_window_ms: 5000,
        }
    }

    /// Read credentials and the testnet toggle from the environment.
    pub fn from_env() -> Result<Self, AdapterError> {
        let api_key = std::env::var(API_KEY_VAR)
            .map_err(|_| AdapterError::Connection(format!("{API_KEY_VAR} is not set")))?;
        let api_secret = std::env::var(API_SECRET_VAR)
            .map_err(|_| AdapterError::Connection(format!("{API_SECRET_VAR} is not set")))?;
        let testnet = std::env::var(TESTNET_VAR)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Ok(Self::new(api_key, api_secret, testnet))
    }

    /// Override the base URL (testing against a local server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the HTTP timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Error body the exchange returns on failed requests.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: String,
    #[serde(rename = "msg")]
    pub message: String,
}

/// Order representation on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireOrder {
    pub order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub executed_qty: Decimal,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

/// Balance entry on the wire.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Position entry on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WirePosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

/// Account snapshot on the wire.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireAccount {
    pub balances: Vec<WireBalance>,
    #[serde(default)]
    pub positions: Vec<WirePosition>,
    pub equity: Decimal,
}

/// Symbol metadata on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireSymbolInfo {
    pub symbol: String,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub min_notional: Decimal,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

/// Exchange-info response on the wire.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireExchangeInfo {
    pub symbols: Vec<WireSymbolInfo>,
}

/// Ticker response on the wire.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireTicker {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

/// Server time response on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireServerTime {
    pub server_time: i64,
}

impl From<WireOrder> for ExecutionResult {
    fn from(wire: WireOrder) -> Self {
        Self {
            success: wire.status != OrderStatus::Rejected,
            order_id: wire.order_id,
            symbol: wire.symbol,
            status: wire.status,
            filled_qty: wire.executed_qty,
            avg_price: wire.avg_price,
            commission: wire.commission,
            error_message: wire.reject_reason,
        }
    }
}

impl From<WireAccount> for AccountInfo {
    fn from(wire: WireAccount) -> Self {
        Self {
            balances: wire
                .balances
                .into_iter()
                .map(|b| Balance {
                    asset: b.asset,
                    free: b.free,
                    locked: b.locked,
                })
                .collect(),
            positions: wire
                .positions
                .into_iter()
                .map(|p| Position {
                    symbol: p.symbol,
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                })
                .collect(),
            equity: wire.equity,
        }
    }
}

impl From<WireSymbolInfo> for SymbolPrecision {
    fn from(wire: WireSymbolInfo) -> Self {
        Self {
            step_size: wire.step_size,
            tick_size: wire.tick_size,
            min_qty: wire.min_qty,
            max_qty: wire.max_qty,
            min_notional: wire.min_notional,
            price_precision: wire.price_precision,
            quantity_precision: wire.quantity_precision,
        }
    }
}

impl From<WireTicker> for MarketSnapshot {
    fn from(wire: WireTicker) -> Self {
        Self {
            symbol: wire.symbol,
            bid: wire.bid,
            ask: wire.ask,
            last: wire.last,
            timestamp: Utc::now(),
        }
    }
}

/// Thin HTTP client for one exchange API generation.
///
/// Maps transport failures to [`AdapterError::Transport`] and error bodies
/// to [`AdapterError::Api`]; carries no retry or breaker logic itself — the
/// v2 adapter layers those on the outside.
#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    http: Client,
    base_url: String,
    path_prefix: &'static str,
    api_key: String,
    recv_window_ms: i64,
}

impl RestClient {
    pub(crate) fn new(
        config: &ExchangeConfig,
        path_prefix: &'static str,
    ) -> Result<Self, AdapterError> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(AdapterError::Connection(
                "exchange credentials are empty".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            path_prefix,
            api_key: config.api_key.clone(),
            recv_window_ms: config.recv_window_ms,
        })
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AdapterError> {
        let url = self.url(path);
        let request = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .query(query)
            .query(&self.signing_params());
        Self::execute(request).await
    }

    pub(crate) async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AdapterError> {
        let url = self.url(path);
        let request = self
            .http
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .query(&self.signing_params())
            .json(body);
        Self::execute(request).await
    }

    pub(crate) async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AdapterError> {
        let url = self.url(path);
        let request = self
            .http
            .delete(&url)
            .header("X-API-KEY", &self.api_key)
            .query(query)
            .query(&self.signing_params());
        Self::execute(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.path_prefix, path)
    }

    fn signing_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("timestamp", Utc::now().timestamp_millis().to_string()),
            ("recvWindow", self.recv_window_ms.to_string()),
        ]
    }

    async fn execute<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
    ) -> Result<T, AdapterError> {
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| AdapterError::Transport(format!("malformed response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(Self::error_from(status, &body))
    }

    fn error_from(status: StatusCode, body: &str) -> AdapterError {
        if let Ok(api_error) = serde_json::from_str::<ApiErrorBody>(body) {
            if api_error.code == TIMESTAMP_SKEW_CODE {
                return AdapterError::TimestampSync { skew_ms: 0 };
            }
            if api_error.code == INSUFFICIENT_BALANCE_CODE {
                return AdapterError::InsufficientBalance(api_error.message);
            }
            if api_error.code == UNKNOWN_ORDER_CODE {
                return AdapterError::OrderNotFound(api_error.message);
            }
            return AdapterError::Api {
                code: api_error.code,
                message: api_error.message,
            };
        }
        AdapterError::Api {
            code: status.as_u16().to_string(),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_base_url_follows_testnet_toggle() {
        let mainnet = ExchangeConfig::new("k", "s", false);
        assert_eq!(mainnet.base_url, MAINNET_BASE_URL);

        let testnet = ExchangeConfig::new("k", "s", true);
        assert_eq!(testnet.base_url, TESTNET_BASE_URL);
        assert!(testnet.testnet);
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let config = ExchangeConfig::new("", "", false);
        let client = RestClient::new(&config, "/api/v1");
        assert!(matches!(client, Err(AdapterError::Connection(_))));
    }

    #[test]
    fn test_error_body_parsing() {
        let err = RestClient::error_from(
            StatusCode::BAD_REQUEST,
            r#"{"code":"-1013","msg":"Filter failure: LOT_SIZE"}"#,
        );
        assert!(matches!(err, AdapterError::Api { ref code, .. } if code == "-1013"));
    }

    #[test]
    fn test_unknown_order_code_maps_to_order_not_found() {
        let err = RestClient::error_from(
            StatusCode::BAD_REQUEST,
            r#"{"code":"-2011","msg":"Unknown order sent"}"#,
        );
        assert!(matches!(err, AdapterError::OrderNotFound(_)));
    }

    #[test]
    fn test_insufficient_balance_code_maps_to_business_error() {
        let err = RestClient::error_from(
            StatusCode::BAD_REQUEST,
            r#"{"code":"-2010","msg":"Account has insufficient balance"}"#,
        );
        assert!(matches!(err, AdapterError::InsufficientBalance(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timestamp_skew_code_maps_to_timestamp_sync() {
        let err = RestClient::error_from(
            StatusCode::BAD_REQUEST,
            r#"{"code":"-1021","msg":"Timestamp outside recvWindow"}"#,
        );
        assert!(matches!(err, AdapterError::TimestampSync { .. }));
    }

    #[test]
    fn test_unparsable_body_falls_back_to_status() {
        let err = RestClient::error_from(StatusCode::SERVICE_UNAVAILABLE, "upstream down");
        match err {
            AdapterError::Api { code, message } => {
                assert_eq!(code, "503");
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
