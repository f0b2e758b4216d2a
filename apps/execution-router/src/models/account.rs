//! Account state reported by execution adapters.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single asset balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Asset ticker (e.g. "USDT").
    pub asset: String,
    /// Balance available for new orders.
    pub free: Decimal,
    /// Balance locked in open orders.
    pub locked: Decimal,
}

impl Balance {
    /// Total balance (free + locked).
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// An open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Trading pair symbol.
    pub symbol: String,
    /// Signed position quantity (negative for shorts).
    pub quantity: Decimal,
    /// Volume-weighted entry price.
    pub entry_price: Decimal,
}

/// Account snapshot returned by `account_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Per-asset balances.
    pub balances: Vec<Balance>,
    /// Open positions.
    pub positions: Vec<Position>,
    /// Total account equity in quote terms.
    pub equity: Decimal,
}

impl AccountInfo {
    /// Look up a balance by asset ticker.
    #[must_use]
    pub fn balance(&self, asset: &str) -> Option<&Balance> {
        self.balances.iter().find(|b| b.asset == asset)
    }
}
