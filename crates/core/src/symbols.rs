//! Static symbol tables
//!
//! The tracked set is fixed at build time. Each entry carries the display name,
//! the foreign USDT pair and the instrument code used by every domestic exchange.
//! Lookups work in both directions (symbol -> code, code -> symbol).

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::{DomesticExchange, Symbol};

/// Quote asset of the foreign market
pub const FOREIGN_QUOTE: &str = "USDT";

/// Static description of one tracked asset
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub symbol: Symbol,
    pub name: &'static str,
    pub foreign_pair: String,
    /// Instrument code per domestic exchange; missing when the asset is not listed
    pub codes: HashMap<DomesticExchange, String>,
}

impl SymbolInfo {
    fn new(symbol: &str, name: &'static str, listed_on_upbit: bool) -> Self {
        let mut codes = HashMap::new();
        codes.insert(DomesticExchange::Bithumb, symbol.to_string());
        codes.insert(DomesticExchange::Coinone, symbol.to_ascii_lowercase());
        if listed_on_upbit {
            codes.insert(DomesticExchange::Upbit, format!("KRW-{}", symbol));
        }

        Self {
            symbol: Symbol::new(symbol),
            name,
            foreign_pair: format!("{}{}", symbol, FOREIGN_QUOTE),
            codes,
        }
    }

    pub fn code(&self, exchange: DomesticExchange) -> Option<&str> {
        self.codes.get(&exchange).map(String::as_str)
    }
}

/// Every tracked asset, in display order
pub static SYMBOLS: LazyLock<Vec<SymbolInfo>> = LazyLock::new(|| {
    vec![
        SymbolInfo::new("BTC", "Bitcoin", true),
        SymbolInfo::new("ETH", "Ethereum", true),
        SymbolInfo::new("XRP", "XRP (Ripple)", true),
        SymbolInfo::new("SOL", "Solana", true),
        SymbolInfo::new("BNB", "BNB", false),  // not listed on Upbit KRW
        SymbolInfo::new("ADA", "Cardano", true),
        SymbolInfo::new("DOGE", "Dogecoin", true),
        SymbolInfo::new("DOT", "Polkadot", true),
        SymbolInfo::new("AVAX", "Avalanche", true),
    ]
});

static BY_SYMBOL: LazyLock<HashMap<Symbol, &'static SymbolInfo>> = LazyLock::new(|| {
    SYMBOLS.iter().map(|info| (info.symbol.clone(), info)).collect()
});

static BY_FOREIGN_PAIR: LazyLock<HashMap<String, &'static SymbolInfo>> = LazyLock::new(|| {
    SYMBOLS.iter().map(|info| (info.foreign_pair.clone(), info)).collect()
});

static BY_CODE: LazyLock<HashMap<(DomesticExchange, String), &'static SymbolInfo>> =
    LazyLock::new(|| {
        SYMBOLS
            .iter()
            .flat_map(|info| {
                info.codes
                    .iter()
                    .map(move |(exchange, code)| ((*exchange, code.clone()), info))
            })
            .collect()
    });

/// All tracked symbols
pub fn tracked_symbols() -> Vec<Symbol> {
    SYMBOLS.iter().map(|info| info.symbol.clone()).collect()
}

pub fn symbol_info(symbol: &Symbol) -> Option<&'static SymbolInfo> {
    BY_SYMBOL.get(symbol).copied()
}

/// Display name, falling back to the symbol itself
pub fn display_name(symbol: &Symbol) -> String {
    symbol_info(symbol)
        .map(|info| info.name.to_string())
        .unwrap_or_else(|| symbol.to_string())
}

/// Foreign pair (e.g. `BTCUSDT`) for a symbol
pub fn foreign_pair(symbol: &Symbol) -> Option<&'static str> {
    symbol_info(symbol).map(|info| info.foreign_pair.as_str())
}

/// Symbol for a foreign pair, case-insensitive (`btcusdt` and `BTCUSDT` both resolve)
pub fn symbol_for_foreign_pair(pair: &str) -> Option<Symbol> {
    BY_FOREIGN_PAIR
        .get(&pair.to_ascii_uppercase())
        .map(|info| info.symbol.clone())
}

/// Instrument code of `symbol` on a domestic exchange
pub fn instrument_code(exchange: DomesticExchange, symbol: &Symbol) -> Option<&'static str> {
    symbol_info(symbol).and_then(|info| info.code(exchange))
}

/// Reverse lookup: domestic instrument code back to the canonical symbol
pub fn symbol_for_code(exchange: DomesticExchange, code: &str) -> Option<Symbol> {
    BY_CODE
        .get(&(exchange, code.to_string()))
        .map(|info| info.symbol.clone())
}

/// Instrument codes of every tracked symbol listed on `exchange`
pub fn instrument_codes(exchange: DomesticExchange) -> Vec<&'static str> {
    SYMBOLS.iter().filter_map(|info| info.code(exchange)).collect()
}
