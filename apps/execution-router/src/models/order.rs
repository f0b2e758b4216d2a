//! Order types for execution tracking.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Order type (market or limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Market order - execute at best available price.
    Market,
    /// Limit order - execute at specified price or better.
    Limit,
}

/// Time in force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Good-til-canceled.
    Gtc,
    /// Immediate-or-cancel (fill immediately, cancel remainder).
    Ioc,
    /// Fill-or-kill (all or nothing, immediate execution required).
    Fok,
}

/// Order status in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order accepted by the venue, not yet filled.
    New,
    /// Order partially filled.
    PartiallyFilled,
    /// Order completely filled.
    Filled,
    /// Order canceled.
    Canceled,
    /// Order rejected by the venue.
    Rejected,
    /// Order expired.
    Expired,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// Returns true if the order is still working (can fill or be canceled).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

/// An order to be routed to an execution adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Caller-assigned id, echoed back by adapters that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    /// Trading pair symbol.
    pub symbol: String,
    /// Trade side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Order quantity in base units.
    pub quantity: Decimal,
    /// Limit price (required for limit orders).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    /// Create a market order.
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            client_order_id: None,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: TimeInForce::Ioc,
        }
    }

    /// Create a limit order.
    #[must_use]
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            client_order_id: None,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: TimeInForce::Gtc,
        }
    }
}

/// Outcome of an order operation as reported by an adapter.
///
/// Business rejections (insufficient balance, invalid parameters) come back
/// as `success == false` with `error_message` set — distinct from transport
/// failures, which surface as [`crate::error::AdapterError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the venue accepted the operation.
    pub success: bool,
    /// Venue-assigned order id.
    pub order_id: String,
    /// Trading pair symbol.
    pub symbol: String,
    /// Current order status.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_qty: Decimal,
    /// Average fill price (zero when unfilled).
    pub avg_price: Decimal,
    /// Commission charged so far.
    pub commission: Decimal,
    /// Rejection reason for failed results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionResult {
    /// A fully filled order.
    #[must_use]
    pub fn filled(
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        qty: Decimal,
        price: Decimal,
        commission: Decimal,
    ) -> Self {
        Self {
            success: true,
            order_id: order_id.into(),
            symbol: symbol.into(),
            status: OrderStatus::Filled,
            filled_qty: qty,
            avg_price: price,
            commission,
            error_message: None,
        }
    }

    /// An accepted, still-working order.
    #[must_use]
    pub fn accepted(order_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            success: true,
            order_id: order_id.into(),
            symbol: symbol.into(),
            status: OrderStatus::New,
            filled_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            commission: Decimal::ZERO,
            error_message: None,
        }
    }

    /// A business rejection with a reason.
    #[must_use]
    pub fn rejected(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: String::new(),
            symbol: symbol.into(),
            status: OrderStatus::Rejected,
            filled_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            commission: Decimal::ZERO,
            error_message: Some(reason.into()),
        }
    }
}
