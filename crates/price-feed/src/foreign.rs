//! Foreign exchange (Binance) feed
//!
//! One combined-stream WebSocket carries the 24h ticker of every tracked pair.
//! Each message is normalized into a [`ForeignTick`] and folded into the
//! foreign store. Price moves are reported on a side channel for flashing.

use futures::future::join_all;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use premium_core::{
    premium, symbols, Direction, FeedError, FeedResult, ForeignConfig, ForeignTick, PriceMove,
    Symbol,
};

use crate::state::ForeignStore;

/// Payload of `GET /api/v3/ticker/24hr`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestTicker {
    symbol: String,
    last_price: Decimal,
    price_change: Decimal,
    price_change_percent: Decimal,
    high_price: Decimal,
    low_price: Decimal,
    volume: Decimal,
}

/// Combined stream envelope: `{"stream": "btcusdt@ticker", "data": {...}}`
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: StreamTicker,
}

#[derive(Debug, Deserialize)]
struct StreamTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: Decimal,
    #[serde(rename = "p", default)]
    price_change: Option<Decimal>,
    #[serde(rename = "P")]
    price_change_percent: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "E", default)]
    event_time: Option<i64>,
}

/// Decode a 24h ticker REST body
pub fn parse_rest_ticker(body: &str) -> FeedResult<ForeignTick> {
    let ticker: RestTicker = serde_json::from_str(body)?;
    let symbol = symbols::symbol_for_foreign_pair(&ticker.symbol)
        .ok_or_else(|| FeedError::UnknownInstrument(ticker.symbol.clone()))?;

    Ok(ForeignTick {
        symbol,
        last_price: ticker.last_price,
        price_change: ticker.price_change,
        price_change_percent: ticker.price_change_percent,
        high: ticker.high_price,
        low: ticker.low_price,
        volume: ticker.volume,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    })
}

/// Decode one combined-stream ticker message
pub fn parse_stream_message(text: &str) -> FeedResult<ForeignTick> {
    let envelope: StreamEnvelope = serde_json::from_str(text)?;
    let ticker = envelope.data;
    let symbol = symbols::symbol_for_foreign_pair(&ticker.symbol)
        .ok_or_else(|| FeedError::UnknownInstrument(ticker.symbol.clone()))?;

    let price_change = match ticker.price_change {
        Some(change) => change,
        None => premium::change_from_percent(ticker.last_price, ticker.price_change_percent)
            .ok_or_else(|| {
                FeedError::InvalidMessage(format!(
                    "cannot derive price change for {}",
                    ticker.symbol
                ))
            })?,
    };

    Ok(ForeignTick {
        symbol,
        last_price: ticker.last_price,
        price_change,
        price_change_percent: ticker.price_change_percent,
        high: ticker.high,
        low: ticker.low,
        volume: ticker.volume,
        timestamp_ms: ticker
            .event_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
    })
}

/// Combined stream URL for the given symbols
pub fn stream_url(ws_url: &str, symbols: &[Symbol]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .filter_map(|s| symbols::foreign_pair(s))
        .map(|pair| format!("{}@ticker", pair.to_ascii_lowercase()))
        .collect();

    format!("{}/stream?streams={}", ws_url.trim_end_matches('/'), streams.join("/"))
}

/// Binance ticker feed
pub struct BinanceFeed {
    config: ForeignConfig,
    symbols: Vec<Symbol>,
    client: reqwest::Client,
    store: ForeignStore,
    moves_tx: mpsc::Sender<PriceMove>,
}

impl BinanceFeed {
    pub fn new(
        config: ForeignConfig,
        symbols: Vec<Symbol>,
        client: reqwest::Client,
        store: ForeignStore,
        moves_tx: mpsc::Sender<PriceMove>,
    ) -> Self {
        Self {
            config,
            symbols,
            client,
            store,
            moves_tx,
        }
    }

    /// Fold one tick into the store, reporting a move when the price changed
    pub fn apply_tick(&self, tick: ForeignTick) -> Option<PriceMove> {
        let previous = self.store.get(&tick.symbol).map(|t| t.last_price);
        let price_move = previous.and_then(|previous| {
            Direction::between(previous, tick.last_price).map(|direction| PriceMove {
                symbol: tick.symbol.clone(),
                direction,
                previous,
                current: tick.last_price,
            })
        });

        self.store.upsert(tick.symbol.clone(), tick);

        if let Some(price_move) = &price_move {
            // Never block the socket on a slow flash consumer
            if let Err(e) = self.moves_tx.try_send(price_move.clone()) {
                debug!("Dropping price move for {}: {}", price_move.symbol, e);
            }
        }
        price_move
    }

    /// Fetch the 24h ticker of every symbol once, concurrently.
    ///
    /// Failed symbols are logged and skipped. Returns the number seeded.
    pub async fn seed(&self) -> usize {
        let requests = self.symbols.iter().filter_map(|symbol| {
            let pair = symbols::foreign_pair(symbol)?;
            let url = format!(
                "{}/api/v3/ticker/24hr?symbol={}",
                self.config.rest_url.trim_end_matches('/'),
                pair
            );
            Some(async move { (pair, self.fetch_ticker(&url).await) })
        });

        let mut seeded = 0;
        for (pair, result) in join_all(requests).await {
            match result {
                Ok(tick) => {
                    self.store.upsert(tick.symbol.clone(), tick);
                    seeded += 1;
                }
                Err(e) => warn!("Seed request for {} failed: {}", pair, e),
            }
        }

        info!("Seeded {}/{} foreign tickers", seeded, self.symbols.len());
        seeded
    }

    async fn fetch_ticker(&self, url: &str) -> anyhow::Result<ForeignTick> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Upstream { status: status.as_u16() }.into());
        }
        let body = response.text().await?;
        Ok(parse_rest_ticker(&body)?)
    }

    /// Stream until the connection ends.
    ///
    /// With `reconnect_attempts = 0` a closed or failed connection is logged and
    /// the feed stops; otherwise it reconnects with bounded exponential backoff.
    pub async fn run(&self) {
        let mut reconnect_count = 0;

        loop {
            match self.connect_and_listen().await {
                Ok(_) => info!("Foreign feed disconnected"),
                Err(e) => error!("Foreign feed error: {}", e),
            }

            reconnect_count += 1;
            if reconnect_count > self.config.reconnect_attempts {
                if self.config.reconnect_attempts > 0 {
                    error!("Max reconnects reached for foreign feed");
                }
                break;
            }

            let delay = self.config.reconnect_delay(reconnect_count);
            warn!(
                "Reconnecting foreign feed in {:?} (attempt {}/{})",
                delay, reconnect_count, self.config.reconnect_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_listen(&self) -> anyhow::Result<()> {
        let url = stream_url(&self.config.ws_url, &self.symbols);
        info!("Connecting to foreign stream at {}", url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        info!("Foreign stream connected ({} symbols)", self.symbols.len());

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => self.handle_text(&text),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_text(&text),
                    Err(e) => warn!("Dropping non UTF-8 foreign frame: {}", e),
                },
                Ok(Message::Ping(data)) => {
                    write.send(Message::Pong(data)).await?;
                }
                Ok(Message::Close(frame)) => {
                    info!("Foreign stream closed by server: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("Foreign WebSocket error: {}", e);
                    return Err(e.into());
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn handle_text(&self, text: &str) {
        match parse_stream_message(text) {
            Ok(tick) => {
                debug!("Foreign tick {} {}", tick.symbol, tick.last_price);
                self.apply_tick(tick);
            }
            Err(e) => warn!("Dropping malformed foreign message: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::latest_store;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn feed() -> (BinanceFeed, crate::state::ForeignReader, mpsc::Receiver<PriceMove>) {
        let (store, reader) = latest_store();
        let (tx, rx) = mpsc::channel(16);
        let feed = BinanceFeed::new(
            ForeignConfig::default(),
            symbols::tracked_symbols(),
            reqwest::Client::new(),
            store,
            tx,
        );
        (feed, reader, rx)
    }

    fn stream_text(pair: &str, price: &str) -> String {
        format!(
            r#"{{"stream":"{}@ticker","data":{{"e":"24hrTicker","E":1700000000000,"s":"{}","p":"100.00","P":"0.15","c":"{}","h":"66000.00","l":"64000.00","v":"12345.6"}}}}"#,
            pair.to_ascii_lowercase(),
            pair,
            price
        )
    }

    #[test]
    fn test_parse_rest_ticker() {
        let body = r#"{"symbol":"BTCUSDT","priceChange":"-250.50","priceChangePercent":"-0.38",
            "lastPrice":"65000.00","highPrice":"66000.00","lowPrice":"64000.00","volume":"1234.5",
            "openPrice":"65250.50"}"#;
        let tick = parse_rest_ticker(body).unwrap();

        assert_eq!(tick.symbol, Symbol::new("BTC"));
        assert_eq!(tick.last_price, d("65000"));
        assert_eq!(tick.price_change, d("-250.50"));
        assert_eq!(tick.volume, d("1234.5"));
    }

    #[test]
    fn test_parse_stream_message() {
        let tick = parse_stream_message(&stream_text("ETHUSDT", "3500.10")).unwrap();
        assert_eq!(tick.symbol, Symbol::new("ETH"));
        assert_eq!(tick.last_price, d("3500.10"));
        assert_eq!(tick.price_change, d("100"));
        assert_eq!(tick.price_change_percent, d("0.15"));
        assert_eq!(tick.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_stream_message_without_absolute_change() {
        let text = r#"{"stream":"btcusdt@ticker","data":{"s":"BTCUSDT","c":"110","P":"10","h":"120","l":"90","v":"1"}}"#;
        let tick = parse_stream_message(text).unwrap();
        assert_eq!(tick.price_change, d("10"));
    }

    #[test]
    fn test_malformed_messages_are_classified() {
        assert!(parse_stream_message("not json").unwrap_err().is_malformed());
        assert!(parse_stream_message(r#"{"result":null,"id":1}"#)
            .unwrap_err()
            .is_malformed());
        let unknown = stream_text("PEPEUSDT", "1");
        assert!(matches!(
            parse_stream_message(&unknown),
            Err(FeedError::UnknownInstrument(_))
        ));
    }

    #[test]
    fn test_stream_url_batches_all_symbols() {
        let url = stream_url(
            "wss://stream.binance.com:9443/",
            &[Symbol::new("BTC"), Symbol::new("ETH")],
        );
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/stream?streams=btcusdt@ticker/ethusdt@ticker"
        );
    }

    #[test]
    fn test_apply_tick_reports_moves() {
        let (feed, reader, mut moves) = feed();

        // First observation has nothing to compare against
        let first = parse_stream_message(&stream_text("BTCUSDT", "65000.00")).unwrap();
        assert!(feed.apply_tick(first).is_none());

        let up = parse_stream_message(&stream_text("BTCUSDT", "65100.00")).unwrap();
        let price_move = feed.apply_tick(up).unwrap();
        assert_eq!(price_move.direction, Direction::Up);
        assert_eq!(price_move.previous, d("65000"));

        // Same price again: no move
        let same = parse_stream_message(&stream_text("BTCUSDT", "65100.00")).unwrap();
        assert!(feed.apply_tick(same).is_none());

        assert_eq!(moves.try_recv().unwrap().direction, Direction::Up);
        assert!(moves.try_recv().is_err());
        assert_eq!(reader.get(&Symbol::new("BTC")).unwrap().last_price, d("65100"));
    }
}
