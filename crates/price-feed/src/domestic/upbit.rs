//! Upbit KRW streaming feed
//!
//! One WebSocket subscribes to the ticker of every listed instrument code.
//! Upbit sends JSON inside binary frames, so frames are UTF-8 decoded before parsing.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use premium_core::{symbols, DomesticExchange, FeedError, FeedResult, Symbol};

use super::{DomesticSource, ObservationSink};

#[derive(Debug, Deserialize)]
struct TickerFrame {
    /// `KRW-BTC`; the default format calls it `code`, REST calls it `market`
    #[serde(alias = "code", alias = "cd")]
    market: String,
    #[serde(alias = "tp")]
    trade_price: Decimal,
}

/// Subscribe request for the given instrument codes
pub fn subscribe_message(ticket: &str, codes: &[&str]) -> String {
    serde_json::json!([
        { "ticket": ticket },
        { "type": "ticker", "codes": codes },
    ])
    .to_string()
}

/// Decode one frame payload into `(symbol, price)`
pub fn parse_frame(payload: &[u8]) -> FeedResult<(Symbol, Decimal)> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| FeedError::InvalidMessage(format!("frame is not UTF-8: {}", e)))?;

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(error) = value.get("error") {
            return Err(FeedError::UpstreamError(error.to_string()));
        }
    }

    let frame: TickerFrame = serde_json::from_str(text)?;
    let symbol = symbols::symbol_for_code(DomesticExchange::Upbit, &frame.market)
        .ok_or_else(|| FeedError::UnknownInstrument(frame.market.clone()))?;

    Ok((symbol, frame.trade_price))
}

/// Upbit ticker stream
pub struct UpbitStream {
    ws_url: String,
}

impl UpbitStream {
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    fn handle_payload(&self, payload: &[u8], sink: &ObservationSink) {
        match parse_frame(payload) {
            Ok((symbol, price)) => {
                debug!("Upbit {} {}", symbol, price);
                sink.publish(symbol, price);
            }
            Err(e) => warn!("Dropping Upbit frame: {}", e),
        }
    }
}

#[async_trait]
impl DomesticSource for UpbitStream {
    fn exchange(&self) -> DomesticExchange {
        DomesticExchange::Upbit
    }

    async fn run(&mut self, sink: &ObservationSink) -> anyhow::Result<()> {
        info!("Connecting to Upbit at {}", self.ws_url);

        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let codes = symbols::instrument_codes(DomesticExchange::Upbit);
        let ticket = uuid::Uuid::new_v4().to_string();
        write
            .send(Message::Text(subscribe_message(&ticket, &codes)))
            .await
            .map_err(|e| FeedError::SubscriptionFailed(e.to_string()))?;

        info!("Subscribed to {} Upbit markets", codes.len());
        sink.mark_active();

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Binary(bytes)) => self.handle_payload(&bytes, sink),
                Ok(Message::Text(text)) => self.handle_payload(text.as_bytes(), sink),
                Ok(Message::Ping(data)) => {
                    write.send(Message::Pong(data)).await?;
                }
                Ok(Message::Close(frame)) => {
                    info!("Upbit closed the connection: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("Upbit WebSocket error: {}", e);
                    return Err(e.into());
                }
                _ => {}
            }
        }

        Ok(())
    }
}
