//! Market data snapshot type.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-of-book quote for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Trading pair symbol.
    pub symbol: String,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Last traded price.
    pub last: Decimal,
    /// Quote timestamp.
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Midpoint of the bid/ask spread.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_mid_price() {
        let snapshot = MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            bid: dec!(99.0),
            ask: dec!(101.0),
            last: dec!(100.5),
            timestamp: Utc::now(),
        };
        assert_eq!(snapshot.mid(), dec!(100.0));
    }
}
