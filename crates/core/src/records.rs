//! Canonical per-symbol records and published snapshots

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::premium;
use crate::{symbols, DomesticExchange, ForeignTick, Symbol};

/// Domestic side of a record. Price and premium only exist together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomesticQuote {
    pub price: Decimal,
    pub premium_percent: Decimal,
}

impl DomesticQuote {
    /// `None` when the premium cannot be computed (non-positive converted price)
    pub fn new(price: Decimal, foreign_price: Decimal, rate: Decimal) -> Option<Self> {
        premium::premium_percent(price, foreign_price, rate).map(|premium_percent| Self {
            price,
            premium_percent,
        })
    }
}

/// Merged, publish-ready state for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRecord {
    pub symbol: Symbol,
    pub display_name: String,
    pub foreign_price: Decimal,
    pub foreign_price_change: Decimal,
    pub foreign_price_change_percent: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
    pub domestic: Option<DomesticQuote>,
}

impl TickerRecord {
    /// New record from the first foreign observation of a symbol
    pub fn from_tick(tick: &ForeignTick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            display_name: symbols::display_name(&tick.symbol),
            foreign_price: tick.last_price,
            foreign_price_change: tick.price_change,
            foreign_price_change_percent: tick.price_change_percent,
            high_24h: tick.high,
            low_24h: tick.low,
            volume_24h: tick.volume,
            domestic: None,
        }
    }

    /// Fold a newer foreign tick into this record
    pub fn apply_tick(&mut self, tick: &ForeignTick) {
        self.foreign_price = tick.last_price;
        self.foreign_price_change = tick.price_change;
        self.foreign_price_change_percent = tick.price_change_percent;
        self.high_24h = tick.high;
        self.low_24h = tick.low;
        self.volume_24h = tick.volume;
    }

    /// Set or clear the domestic side. Price and premium move together.
    pub fn set_domestic(&mut self, domestic_price: Option<Decimal>, rate: Decimal) {
        self.domestic = domestic_price
            .and_then(|price| DomesticQuote::new(price, self.foreign_price, rate));
    }

    pub fn domestic_price(&self) -> Option<Decimal> {
        self.domestic.map(|quote| quote.price)
    }

    pub fn premium_percent(&self) -> Option<Decimal> {
        self.domestic.map(|quote| quote.premium_percent)
    }

    /// Foreign price converted to domestic currency, the display fallback
    /// when no domestic price has been observed.
    pub fn converted_price(&self, rate: Decimal) -> Option<Decimal> {
        premium::convert(self.foreign_price, rate)
    }

    /// Distance of the last price from the 24h high, in percent
    pub fn high_diff_percent(&self) -> Option<Decimal> {
        premium::percent_from(self.foreign_price, self.high_24h)
    }

    /// Distance of the last price from the 24h low, in percent
    pub fn low_diff_percent(&self) -> Option<Decimal> {
        premium::percent_from(self.foreign_price, self.low_24h)
    }
}

/// Immutable published view of every record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub sequence: u64,
    pub exchange: Option<DomesticExchange>,
    pub rate: Decimal,
    pub records: HashMap<Symbol, TickerRecord>,
    pub published_at_ms: i64,
}

impl MarketSnapshot {
    pub fn get(&self, symbol: &Symbol) -> Option<&TickerRecord> {
        self.records.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered by 24h volume, largest first
    pub fn sorted_by_volume(&self) -> Vec<&TickerRecord> {
        let mut rows: Vec<&TickerRecord> = self.records.values().collect();
        rows.sort_by(|a, b| {
            b.volume_24h
                .cmp(&a.volume_24h)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        rows
    }

    /// Number of records that currently have a domestic price
    pub fn domestic_count(&self) -> usize {
        self.records.values().filter(|r| r.domestic.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn tick(symbol: &str, price: &str, volume: &str) -> ForeignTick {
        ForeignTick {
            symbol: Symbol::new(symbol),
            last_price: d(price),
            price_change: d("10"),
            price_change_percent: d("0.5"),
            high: d("70000"),
            low: d("60000"),
            volume: d(volume),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_record_starts_without_domestic() {
        let record = TickerRecord::from_tick(&tick("BTC", "65000", "100"));
        assert_eq!(record.display_name, "Bitcoin");
        assert_eq!(record.domestic_price(), None);
        assert_eq!(record.premium_percent(), None);
    }

    #[test]
    fn test_domestic_and_premium_move_together() {
        let mut record = TickerRecord::from_tick(&tick("BTC", "65000", "100"));
        record.set_domestic(Some(d("87750000")), d("1350"));
        assert_eq!(record.domestic_price(), Some(d("87750000")));
        assert_eq!(record.premium_percent(), Some(Decimal::ZERO));

        record.set_domestic(None, d("1350"));
        assert_eq!(record.domestic_price(), None);
        assert_eq!(record.premium_percent(), None);

        // A zero rate cannot produce a premium, so neither side is kept
        record.set_domestic(Some(d("87750000")), Decimal::ZERO);
        assert!(record.domestic.is_none());
    }

    #[test]
    fn test_converted_fallback_and_ranges() {
        let record = TickerRecord::from_tick(&tick("BTC", "63000", "100"));
        assert_eq!(record.converted_price(d("1350")), Some(d("85050000")));
        assert_eq!(record.high_diff_percent(), Some(d("-10")));
        assert_eq!(record.low_diff_percent(), Some(d("5")));
    }

    #[test]
    fn test_sorted_by_volume() {
        let mut snapshot = MarketSnapshot::default();
        for (symbol, volume) in [("BTC", "10"), ("ETH", "30"), ("XRP", "20")] {
            let record = TickerRecord::from_tick(&tick(symbol, "1", volume));
            snapshot.records.insert(record.symbol.clone(), record);
        }

        let order: Vec<&str> = snapshot
            .sorted_by_volume()
            .iter()
            .map(|r| r.symbol.as_str())
            .collect();
        assert_eq!(order, vec!["ETH", "XRP", "BTC"]);
    }
}
