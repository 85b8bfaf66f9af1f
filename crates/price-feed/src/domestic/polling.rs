//! Polling domestic feeds (Bithumb, Coinone)
//!
//! Each cycle issues exactly one bulk "all tickers" request and derives the price
//! of every tracked symbol from that single response. A failed cycle is logged
//! and leaves the previous observations untouched.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use premium_core::{symbols, DomesticExchange, FeedError, FeedResult, Symbol};

use super::{DomesticSource, ObservationSink};

/// Exchanges served by the polling variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingVenue {
    Bithumb,
    Coinone,
}

impl PollingVenue {
    pub fn exchange(&self) -> DomesticExchange {
        match self {
            PollingVenue::Bithumb => DomesticExchange::Bithumb,
            PollingVenue::Coinone => DomesticExchange::Coinone,
        }
    }

    /// Extract every tracked symbol's price from one bulk response body
    pub fn parse(&self, body: &str) -> FeedResult<Vec<(Symbol, Decimal)>> {
        match self {
            PollingVenue::Bithumb => parse_bithumb(body),
            PollingVenue::Coinone => parse_coinone(body),
        }
    }
}

/// `{"status": "0000", "data": {"BTC": {"closing_price": "..."}, ..., "date": "..."}}`
#[derive(Debug, Deserialize)]
struct BithumbResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BithumbTicker {
    closing_price: Decimal,
}

fn parse_bithumb(body: &str) -> FeedResult<Vec<(Symbol, Decimal)>> {
    let response: BithumbResponse = serde_json::from_str(body)?;
    if response.status != "0000" {
        return Err(FeedError::UpstreamError(format!(
            "bithumb status {}: {}",
            response.status,
            response.message.unwrap_or_default()
        )));
    }

    let exchange = DomesticExchange::Bithumb;
    let mut prices = Vec::new();
    for code in symbols::instrument_codes(exchange) {
        let Some(entry) = response.data.get(code) else {
            continue;
        };
        match BithumbTicker::deserialize(entry) {
            Ok(ticker) => {
                if let Some(symbol) = symbols::symbol_for_code(exchange, code) {
                    prices.push((symbol, ticker.closing_price));
                }
            }
            Err(e) => debug!("Skipping bithumb entry {}: {}", code, e),
        }
    }
    Ok(prices)
}

/// `{"result": "success", "error_code": "0", "tickers": [{"target_currency": "btc", "last": "..."}]}`
#[derive(Debug, Deserialize)]
struct CoinoneResponse {
    result: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    tickers: Vec<CoinoneTicker>,
}

#[derive(Debug, Deserialize)]
struct CoinoneTicker {
    target_currency: String,
    last: Decimal,
}

fn parse_coinone(body: &str) -> FeedResult<Vec<(Symbol, Decimal)>> {
    let response: CoinoneResponse = serde_json::from_str(body)?;
    if response.result != "success" {
        return Err(FeedError::UpstreamError(format!(
            "coinone error code {}",
            response.error_code.unwrap_or_default()
        )));
    }

    Ok(response
        .tickers
        .into_iter()
        .filter_map(|ticker| {
            let code = ticker.target_currency.to_ascii_lowercase();
            symbols::symbol_for_code(DomesticExchange::Coinone, &code)
                .map(|symbol| (symbol, ticker.last))
        })
        .collect())
}

/// Fixed-interval bulk poller
pub struct PollingFeed {
    venue: PollingVenue,
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl PollingFeed {
    pub fn new(venue: PollingVenue, url: String, interval: Duration, client: reqwest::Client) -> Self {
        Self {
            venue,
            url,
            interval,
            client,
        }
    }

    async fn fetch(&self) -> anyhow::Result<String> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Upstream { status: status.as_u16() }.into());
        }
        Ok(response.text().await?)
    }

    /// Fold the outcome of one cycle into the sink.
    ///
    /// Returns the number of prices written; a failure writes nothing.
    pub fn apply_cycle(&self, outcome: anyhow::Result<String>, sink: &ObservationSink) -> usize {
        let parsed = outcome.and_then(|body| Ok(self.venue.parse(&body)?));
        match parsed {
            Ok(prices) => {
                let written = sink.publish_batch(prices);
                debug!("{} poll updated {} symbols", self.venue.exchange(), written);
                written
            }
            Err(e) => {
                warn!("{} poll failed: {}", self.venue.exchange(), e);
                0
            }
        }
    }
}

#[async_trait]
impl DomesticSource for PollingFeed {
    fn exchange(&self) -> DomesticExchange {
        self.venue.exchange()
    }

    async fn run(&mut self, sink: &ObservationSink) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let outcome = self.fetch().await;
            self.apply_cycle(outcome, sink);
            // Ready after the first completed cycle, whatever its outcome
            sink.mark_active();
        }
    }
}
