//! Per-symbol precision cache for order rounding.
//!
//! Exchanges reject orders whose quantity or price is not aligned to the
//! symbol's step/tick size. The mapper caches those rules and rounds values
//! DOWN to the nearest valid increment using decimal arithmetic — binary
//! float rounding here would produce values the venue refuses.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default refresh interval for cached precision rules.
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(3600);

/// Rounding rules for one symbol, as published by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolPrecision {
    /// Quantity increment.
    pub step_size: Decimal,
    /// Price increment.
    pub tick_size: Decimal,
    /// Minimum order quantity.
    pub min_qty: Decimal,
    /// Maximum order quantity.
    pub max_qty: Decimal,
    /// Minimum order notional (quantity * price).
    pub min_notional: Decimal,
    /// Decimal places for prices.
    pub price_precision: u32,
    /// Decimal places for quantities.
    pub quantity_precision: u32,
}

/// Cache of per-symbol rounding rules with a refresh TTL.
///
/// The adapter owning the mapper is responsible for refreshing: when
/// [`PrecisionMapper::needs_update`] reports true, fetch fresh exchange
/// metadata and feed it back through [`PrecisionMapper::update_cache`].
#[derive(Debug)]
pub struct PrecisionMapper {
    entries: RwLock<HashMap<String, SymbolPrecision>>,
    last_update: RwLock<Option<Instant>>,
    update_interval: Duration,
}

impl Default for PrecisionMapper {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL)
    }
}

impl PrecisionMapper {
    /// Create a mapper with a custom refresh interval.
    #[must_use]
    pub fn new(update_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_update: RwLock::new(None),
            update_interval,
        }
    }

    /// Round a quantity DOWN to the symbol's step size.
    ///
    /// Unknown symbols are returned unchanged — the venue will be the judge.
    #[must_use]
    pub fn format_quantity(&self, symbol: &str, qty: Decimal) -> Decimal {
        let entries = self.read_entries();
        match entries.get(symbol) {
            Some(info) if !info.step_size.is_zero() => {
                round_down_to_increment(qty, info.step_size)
            }
            _ => qty,
        }
    }

    /// Round a price DOWN to the symbol's tick size.
    ///
    /// Unknown symbols are returned unchanged.
    #[must_use]
    pub fn format_price(&self, symbol: &str, price: Decimal) -> Decimal {
        let entries = self.read_entries();
        match entries.get(symbol) {
            Some(info) if !info.tick_size.is_zero() => {
                round_down_to_increment(price, info.tick_size)
            }
            _ => price,
        }
    }

    /// Whether the cache is stale and should be refreshed from the exchange.
    #[must_use]
    pub fn needs_update(&self) -> bool {
        self.last_update
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_none_or(|at| at.elapsed() > self.update_interval)
    }

    /// Overwrite one symbol's rules and bump the cache-wide freshness stamp.
    pub fn update_cache(&self, symbol: impl Into<String>, info: SymbolPrecision) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(symbol.into(), info);
        drop(entries);

        let mut last_update = self
            .last_update
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last_update = Some(Instant::now());
    }

    /// Fetch one symbol's cached rules.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<SymbolPrecision> {
        self.read_entries().get(symbol).cloned()
    }

    /// Export `symbol -> (price_precision, quantity_precision)` for display.
    #[must_use]
    pub fn precision_map(&self) -> HashMap<String, (u32, u32)> {
        self.read_entries()
            .iter()
            .map(|(symbol, info)| {
                (
                    symbol.clone(),
                    (info.price_precision, info.quantity_precision),
                )
            })
            .collect()
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SymbolPrecision>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Largest multiple of `increment` that is `<= value`.
fn round_down_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    (value / increment).floor() * increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_precision() -> SymbolPrecision {
        SymbolPrecision {
            step_size: dec!(0.001),
            tick_size: dec!(0.01),
            min_qty: dec!(0.001),
            max_qty: dec!(9000),
            min_notional: dec!(10),
            price_precision: 2,
            quantity_precision: 3,
        }
    }

    #[test]
    fn test_quantity_rounds_down_to_step() {
        let mapper = PrecisionMapper::default();
        mapper.update_cache("BTCUSDT", btc_precision());

        assert_eq!(mapper.format_quantity("BTCUSDT", dec!(0.12345)), dec!(0.123));
        assert_eq!(mapper.format_quantity("BTCUSDT", dec!(0.1239)), dec!(0.123));
        assert_eq!(mapper.format_quantity("BTCUSDT", dec!(1)), dec!(1));
    }

    #[test]
    fn test_price_rounds_down_to_tick() {
        let mapper = PrecisionMapper::default();
        mapper.update_cache("BTCUSDT", btc_precision());

        assert_eq!(mapper.format_price("BTCUSDT", dec!(42123.456)), dec!(42123.45));
        assert_eq!(mapper.format_price("BTCUSDT", dec!(42123.40)), dec!(42123.40));
    }

    #[test]
    fn test_result_is_multiple_and_never_above_input() {
        let mapper = PrecisionMapper::default();
        mapper.update_cache("BTCUSDT", btc_precision());

        let qty = dec!(5.4321987);
        let rounded = mapper.format_quantity("BTCUSDT", qty);
        assert!(rounded <= qty);
        assert_eq!(rounded % dec!(0.001), Decimal::ZERO);
    }

    #[test]
    fn test_unknown_symbol_passes_through() {
        let mapper = PrecisionMapper::default();
        assert_eq!(mapper.format_quantity("DOGEUSDT", dec!(1.2345)), dec!(1.2345));
        assert_eq!(mapper.format_price("DOGEUSDT", dec!(0.0789)), dec!(0.0789));
    }

    #[test]
    fn test_needs_update_ttl() {
        let mapper = PrecisionMapper::new(Duration::from_millis(10));
        assert!(mapper.needs_update());

        mapper.update_cache("BTCUSDT", btc_precision());
        assert!(!mapper.needs_update());

        std::thread::sleep(Duration::from_millis(20));
        assert!(mapper.needs_update());
    }

    #[test]
    fn test_update_overwrites_entry() {
        let mapper = PrecisionMapper::default();
        mapper.update_cache("BTCUSDT", btc_precision());

        let mut coarser = btc_precision();
        coarser.step_size = dec!(0.01);
        mapper.update_cache("BTCUSDT", coarser);

        assert_eq!(mapper.format_quantity("BTCUSDT", dec!(0.129)), dec!(0.12));
    }

    #[test]
    fn test_precision_map_export() {
        let mapper = PrecisionMapper::default();
        mapper.update_cache("BTCUSDT", btc_precision());

        let map = mapper.precision_map();
        assert_eq!(map.get("BTCUSDT"), Some(&(2, 3)));
    }
}
