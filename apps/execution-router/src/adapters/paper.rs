//! Paper-trading execution adapter with simulated fills.
//!
//! Keeps balances, positions and an open-order book in memory. Marketable
//! orders fill immediately at the order price (market orders at the tracked
//! mark); limit orders that do not cross the mark rest until a later mark
//! update crosses them. Fees are charged at a flat rate on notional.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AdapterError;
use crate::models::{
    AccountInfo, Balance, ExecutionResult, MarketSnapshot, OrderRequest, OrderSide, OrderStatus,
    OrderType, Position,
};
use crate::resilience::SymbolPrecision;

use super::{AdapterHealth, CallCounters, ExecutionAdapter};

/// Quote asset all paper balances are denominated in.
const QUOTE_ASSET: &str = "USDT";

#[derive(Debug, Default)]
struct PaperState {
    /// Free quote balance.
    quote_balance: Decimal,
    /// Last known mark price per symbol.
    marks: HashMap<String, Decimal>,
    /// Resting limit orders by order id, with their limit price.
    open: HashMap<String, (OrderRequest, ExecutionResult)>,
    /// Terminal orders by order id.
    done: HashMap<String, ExecutionResult>,
    /// Net position and volume-weighted entry per symbol.
    positions: HashMap<String, Position>,
}

/// Paper-trading simulator implementing the execution port.
#[derive(Debug)]
pub struct PaperAdapter {
    fee_rate: Decimal,
    connected: AtomicBool,
    counters: CallCounters,
    state: RwLock<PaperState>,
}

impl Default for PaperAdapter {
    fn default() -> Self {
        Self::new(dec!(10000))
    }
}

impl PaperAdapter {
    /// Create a simulator seeded with a quote balance and 10bps fees.
    #[must_use]
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            fee_rate: dec!(0.001),
            connected: AtomicBool::new(false),
            counters: CallCounters::default(),
            state: RwLock::new(PaperState {
                quote_balance: starting_balance,
                ..Default::default()
            }),
        }
    }

    /// Override the commission rate.
    #[must_use]
    pub const fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Set the mark price for a symbol and fill any resting orders it
    /// crosses.
    pub async fn set_mark(&self, symbol: impl Into<String>, price: Decimal) {
        let symbol = symbol.into();
        let mut state = self.state.write().await;
        state.marks.insert(symbol.clone(), price);

        let crossed: Vec<String> = state
            .open
            .iter()
            .filter(|(_, (request, _))| {
                request.symbol == symbol
                    && request
                        .price
                        .is_some_and(|limit| Self::crosses(request.side, limit, price))
            })
            .map(|(id, _)| id.clone())
            .collect();

        for order_id in crossed {
            if let Some((request, _resting)) = state.open.remove(&order_id) {
                let limit = request.price.unwrap_or(price);
                match self.fill(&mut state, &request, limit, Some(order_id.clone())) {
                    Ok(filled) => {
                        tracing::info!(
                            order_id = %order_id,
                            symbol = %request.symbol,
                            price = %limit,
                            "Resting paper order crossed and filled"
                        );
                        state.done.insert(order_id, filled);
                    }
                    Err(rejected) => {
                        // Could not honor the fill (balance drained since
                        // resting); the order dies rejected.
                        tracing::warn!(
                            order_id = %order_id,
                            reason = rejected.error_message.as_deref().unwrap_or(""),
                            "Resting paper order rejected on cross"
                        );
                        state.done.insert(order_id, rejected);
                    }
                }
            }
        }
    }

    fn crosses(side: OrderSide, limit: Decimal, mark: Decimal) -> bool {
        match side {
            OrderSide::Buy => limit >= mark,
            OrderSide::Sell => limit <= mark,
        }
    }

    /// Attempt an immediate fill, mutating balances and positions.
    ///
    /// Returns `Err` with a rejected result when the account cannot cover
    /// the trade — a business rejection, not a transport failure.
    fn fill(
        &self,
        state: &mut PaperState,
        request: &OrderRequest,
        price: Decimal,
        order_id: Option<String>,
    ) -> Result<ExecutionResult, ExecutionResult> {
        let order_id = order_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let notional = request.quantity * price;
        let fee = notional * self.fee_rate;

        match request.side {
            OrderSide::Buy => {
                let required = notional + fee;
                if state.quote_balance < required {
                    return Err(ExecutionResult::rejected(
                        request.symbol.clone(),
                        format!(
                            "insufficient balance: required {required}, available {}",
                            state.quote_balance
                        ),
                    ));
                }
                state.quote_balance -= required;
                Self::apply_position(state, &request.symbol, request.quantity, price);
            }
            OrderSide::Sell => {
                let held = state
                    .positions
                    .get(&request.symbol)
                    .map_or(Decimal::ZERO, |p| p.quantity);
                if held < request.quantity {
                    return Err(ExecutionResult::rejected(
                        request.symbol.clone(),
                        format!(
                            "insufficient position: selling {}, holding {held}",
                            request.quantity
                        ),
                    ));
                }
                state.quote_balance += notional - fee;
                Self::apply_position(state, &request.symbol, -request.quantity, price);
            }
        }

        Ok(ExecutionResult::filled(
            order_id,
            request.symbol.clone(),
            request.quantity,
            price,
            fee,
        ))
    }

    fn apply_position(state: &mut PaperState, symbol: &str, delta: Decimal, price: Decimal) {
        let position = state
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position {
                symbol: symbol.to_string(),
                quantity: Decimal::ZERO,
                entry_price: Decimal::ZERO,
            });

        let new_qty = position.quantity + delta;
        if delta > Decimal::ZERO {
            let old_notional = position.quantity * position.entry_price;
            let add_notional = delta * price;
            position.entry_price = if new_qty.is_zero() {
                Decimal::ZERO
            } else {
                (old_notional + add_notional) / new_qty
            };
        }
        position.quantity = new_qty;

        if position.quantity.is_zero() {
            state.positions.remove(symbol);
        }
    }

    fn default_precision() -> SymbolPrecision {
        SymbolPrecision {
            step_size: dec!(0.000001),
            tick_size: dec!(0.01),
            min_qty: dec!(0.000001),
            max_qty: dec!(1000000),
            min_notional: dec!(10),
            price_precision: 2,
            quantity_precision: 6,
        }
    }
}

#[async_trait]
impl ExecutionAdapter for PaperAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(adapter = "paper", "Paper adapter connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!(adapter = "paper", "Paper adapter disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<ExecutionResult, AdapterError> {
        if !self.is_connected() {
            return self
                .counters
                .observe(Err(AdapterError::NotConnected("paper")));
        }

        let mut state = self.state.write().await;
        let mark = state.marks.get(&order.symbol).copied();

        let result = match (order.order_type, order.price, mark) {
            (OrderType::Market, _, None) => Ok(ExecutionResult::rejected(
                order.symbol.clone(),
                format!("no market price available for {}", order.symbol),
            )),
            (OrderType::Market, _, Some(mark)) => {
                Ok(self.fill(&mut state, order, mark, None).unwrap_or_else(|r| r))
            }
            (OrderType::Limit, None, _) => Ok(ExecutionResult::rejected(
                order.symbol.clone(),
                "limit order without a price",
            )),
            (OrderType::Limit, Some(limit), mark) => {
                let marketable = mark.is_none_or(|mark| Self::crosses(order.side, limit, mark));
                if marketable {
                    Ok(self.fill(&mut state, order, limit, None).unwrap_or_else(|r| r))
                } else {
                    // Rest on the simulated book until a mark crosses it.
                    let order_id = Uuid::new_v4().to_string();
                    let resting =
                        ExecutionResult::accepted(order_id.clone(), order.symbol.clone());
                    state
                        .open
                        .insert(order_id.clone(), (order.clone(), resting.clone()));
                    tracing::info!(
                        order_id = %order_id,
                        symbol = %order.symbol,
                        limit = %limit,
                        "Paper order resting"
                    );
                    Ok(resting)
                }
            }
        };

        if let Ok(filled @ ExecutionResult { success: true, .. }) = &result {
            if filled.status == OrderStatus::Filled {
                state.done.insert(filled.order_id.clone(), filled.clone());
                tracing::info!(
                    order_id = %filled.order_id,
                    symbol = %filled.symbol,
                    qty = %filled.filled_qty,
                    price = %filled.avg_price,
                    "Paper order filled"
                );
            }
        }

        drop(state);
        self.counters.observe(result)
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<bool, AdapterError> {
        let mut state = self.state.write().await;
        let result = if let Some((_, mut resting)) = state.open.remove(order_id) {
            resting.status = OrderStatus::Canceled;
            state.done.insert(order_id.to_string(), resting);
            tracing::info!(order_id = %order_id, "Paper order canceled");
            Ok(true)
        } else {
            Ok(false)
        };
        drop(state);
        self.counters.observe(result)
    }

    async fn order_status(
        &self,
        order_id: &str,
        _symbol: &str,
    ) -> Result<ExecutionResult, AdapterError> {
        let state = self.state.read().await;
        let result = state
            .open
            .get(order_id)
            .map(|(_, resting)| resting.clone())
            .or_else(|| state.done.get(order_id).cloned())
            .ok_or_else(|| AdapterError::OrderNotFound(order_id.to_string()));
        drop(state);
        self.counters.observe(result)
    }

    async fn open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<ExecutionResult>, AdapterError> {
        let state = self.state.read().await;
        let orders = state
            .open
            .values()
            .filter(|(request, _)| symbol.is_none_or(|s| request.symbol == s))
            .map(|(_, resting)| resting.clone())
            .collect();
        drop(state);
        self.counters.observe(Ok(orders))
    }

    async fn account_info(&self) -> Result<AccountInfo, AdapterError> {
        let state = self.state.read().await;
        let positions: Vec<Position> = state.positions.values().cloned().collect();
        let equity = positions.iter().fold(state.quote_balance, |acc, p| {
            let mark = state
                .marks
                .get(&p.symbol)
                .copied()
                .unwrap_or(p.entry_price);
            acc + p.quantity * mark
        });
        let info = AccountInfo {
            balances: vec![Balance {
                asset: QUOTE_ASSET.to_string(),
                free: state.quote_balance,
                locked: Decimal::ZERO,
            }],
            positions,
            equity,
        };
        drop(state);
        self.counters.observe(Ok(info))
    }

    async fn market_data(&self, symbol: &str) -> Result<MarketSnapshot, AdapterError> {
        let state = self.state.read().await;
        let result = state.marks.get(symbol).copied().map_or_else(
            || {
                Err(AdapterError::Api {
                    code: "404".to_string(),
                    message: format!("no quote for {symbol}"),
                })
            },
            |mark| {
                Ok(MarketSnapshot {
                    symbol: symbol.to_string(),
                    bid: mark,
                    ask: mark,
                    last: mark,
                    timestamp: Utc::now(),
                })
            },
        );
        drop(state);
        self.counters.observe(result)
    }

    async fn symbol_info(&self, _symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        Ok(Self::default_precision())
    }

    async fn precision_map(&self) -> Result<HashMap<String, (u32, u32)>, AdapterError> {
        let state = self.state.read().await;
        let precision = Self::default_precision();
        Ok(state
            .marks
            .keys()
            .map(|symbol| {
                (
                    symbol.clone(),
                    (precision.price_precision, precision.quantity_precision),
                )
            })
            .collect())
    }

    fn adapter_name(&self) -> &'static str {
        "paper"
    }

    async fn health(&self) -> Result<AdapterHealth, AdapterError> {
        let mut health = AdapterHealth {
            connected: self.is_connected(),
            open_orders: self.state.read().await.open.len(),
            ..Default::default()
        };
        self.counters.fill_health(&mut health);
        Ok(health)
    }
}
