//! Core type definitions

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;

/// Canonical asset identifier shared by every exchange (e.g. `BTC`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Symbol::new(value)
    }
}

/// How a domestic exchange delivers prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Streaming,
    Polling,
}

/// Selectable domestic (KRW) exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomesticExchange {
    Bithumb,
    Upbit,
    Coinone,
}

impl DomesticExchange {
    pub const ALL: [DomesticExchange; 3] = [
        DomesticExchange::Bithumb,
        DomesticExchange::Upbit,
        DomesticExchange::Coinone,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DomesticExchange::Bithumb => "bithumb",
            DomesticExchange::Upbit => "upbit",
            DomesticExchange::Coinone => "coinone",
        }
    }

    /// Label shown next to domestic prices
    pub fn label(&self) -> &'static str {
        match self {
            DomesticExchange::Bithumb => "Bithumb KRW",
            DomesticExchange::Upbit => "Upbit KRW",
            DomesticExchange::Coinone => "Coinone KRW",
        }
    }

    pub fn feed_kind(&self) -> FeedKind {
        match self {
            DomesticExchange::Upbit => FeedKind::Streaming,
            DomesticExchange::Bithumb | DomesticExchange::Coinone => FeedKind::Polling,
        }
    }
}

impl fmt::Display for DomesticExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DomesticExchange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bithumb" => Ok(DomesticExchange::Bithumb),
            "upbit" => Ok(DomesticExchange::Upbit),
            "coinone" => Ok(DomesticExchange::Coinone),
            other => Err(CoreError::UnknownExchange(other.to_string())),
        }
    }
}

/// One normalized 24h ticker update from the foreign exchange.
///
/// Transient: folded into the foreign store and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignTick {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub timestamp_ms: i64,
}

/// One domestic-currency price for a symbol, as seen on a domestic exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomesticObservation {
    pub symbol: Symbol,
    pub exchange: DomesticExchange,
    pub price: Decimal,
    pub observed_at_ms: i64,
}

/// Direction of a foreign price move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Direction from `previous` to `current`, `None` when unchanged
    pub fn between(previous: Decimal, current: Decimal) -> Option<Direction> {
        match current.cmp(&previous) {
            std::cmp::Ordering::Greater => Some(Direction::Up),
            std::cmp::Ordering::Less => Some(Direction::Down),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Emitted by the foreign adapter when a symbol's last price changes
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMove {
    pub symbol: Symbol,
    pub direction: Direction,
    pub previous: Decimal,
    pub current: Decimal,
}

/// Per-symbol UI flash signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashState {
    #[default]
    None,
    Up,
    Down,
}

impl From<Direction> for FlashState {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => FlashState::Up,
            Direction::Down => FlashState::Down,
        }
    }
}

/// Lifecycle of one domestic adapter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Idle,
    Connecting,
    Active,
    Closed,
}

impl FeedState {
    /// Whether a transition from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: FeedState) -> bool {
        matches!(
            (*self, next),
            (FeedState::Idle, FeedState::Connecting)
                | (FeedState::Connecting, FeedState::Active)
                | (FeedState::Connecting, FeedState::Closed)
                | (FeedState::Active, FeedState::Closed)
        )
    }

    /// Loading may end once the instance is ready or has failed
    pub fn is_settled(&self) -> bool {
        matches!(self, FeedState::Active | FeedState::Closed)
    }
}

/// Active domestic exchange plus whether a switch is still loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionState {
    pub exchange: Option<DomesticExchange>,
    pub loading: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_is_uppercased() {
        assert_eq!(Symbol::new("btc").as_str(), "BTC");
        assert_eq!(Symbol::from("Eth"), Symbol::new("ETH"));
    }

    #[test]
    fn test_exchange_parsing() {
        assert_eq!("Upbit".parse::<DomesticExchange>().unwrap(), DomesticExchange::Upbit);
        assert_eq!(" bithumb ".parse::<DomesticExchange>().unwrap(), DomesticExchange::Bithumb);
        assert!("binance".parse::<DomesticExchange>().is_err());
    }

    #[test]
    fn test_feed_kinds() {
        assert_eq!(DomesticExchange::Upbit.feed_kind(), FeedKind::Streaming);
        assert_eq!(DomesticExchange::Bithumb.feed_kind(), FeedKind::Polling);
        assert_eq!(DomesticExchange::Coinone.feed_kind(), FeedKind::Polling);
    }

    #[test]
    fn test_direction_between() {
        let a = Decimal::new(6500000, 2);
        let b = Decimal::new(6510000, 2);
        assert_eq!(Direction::between(a, b), Some(Direction::Up));
        assert_eq!(Direction::between(b, a), Some(Direction::Down));
        assert_eq!(Direction::between(a, a), None);
    }

    #[test]
    fn test_feed_state_machine() {
        assert!(FeedState::Idle.can_transition_to(FeedState::Connecting));
        assert!(FeedState::Connecting.can_transition_to(FeedState::Active));
        assert!(FeedState::Connecting.can_transition_to(FeedState::Closed));
        assert!(FeedState::Active.can_transition_to(FeedState::Closed));
        assert!(!FeedState::Closed.can_transition_to(FeedState::Connecting));
        assert!(!FeedState::Idle.can_transition_to(FeedState::Active));
    }
}
