//! Conversion rate provider
//!
//! Owns the single process-wide USDT -> KRW rate. Consumers subscribe to a
//! watch channel and are only woken when the value actually changes.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use premium_core::{FeedError, FeedResult, RateConfig};

/// Accepted response shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RateResponse {
    /// `{"rate": 1385.2}`
    Direct { rate: Decimal },
    /// `{"base": "USD", "rates": {"KRW": 1385.2, ...}}`
    Table { rates: HashMap<String, Decimal> },
}

/// Decode a rate service body, picking `quote_currency` out of a rate table
pub fn parse_rate(body: &str, quote_currency: &str) -> FeedResult<Decimal> {
    let response: RateResponse = serde_json::from_str(body)?;
    let rate = match response {
        RateResponse::Direct { rate } => rate,
        RateResponse::Table { rates } => *rates.get(quote_currency).ok_or_else(|| {
            FeedError::InvalidMessage(format!("{} rate not found", quote_currency))
        })?,
    };

    if rate <= Decimal::ZERO {
        return Err(FeedError::InvalidMessage(format!("non-positive rate {}", rate)));
    }
    Ok(rate)
}

/// Periodically refreshed conversion rate
pub struct RateProvider {
    config: RateConfig,
    client: reqwest::Client,
    tx: watch::Sender<Decimal>,
}

impl RateProvider {
    /// Starts at the configured fallback rate
    pub fn new(config: RateConfig, client: reqwest::Client) -> Self {
        let (tx, _) = watch::channel(config.default_rate);
        Self { config, client, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Decimal> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Decimal {
        *self.tx.borrow()
    }

    /// Store a freshly fetched rate. Returns true when subscribers were notified.
    pub fn update(&self, rate: Decimal) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == rate {
                false
            } else {
                info!("Conversion rate changed {} -> {}", current, rate);
                *current = rate;
                true
            }
        })
    }

    async fn fetch(&self) -> anyhow::Result<Decimal> {
        let response = self.client.get(&self.config.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Upstream { status: status.as_u16() }.into());
        }
        let body = response.text().await?;
        Ok(parse_rate(&body, &self.config.quote_currency)?)
    }

    /// One refresh cycle. A failure falls back to the configured default rate.
    pub async fn refresh(&self) -> bool {
        match self.fetch().await {
            Ok(rate) => self.update(rate),
            Err(e) => {
                warn!(
                    "Conversion rate fetch failed, using default {}: {}",
                    self.config.default_rate, e
                );
                self.update(self.config.default_rate)
            }
        }
    }

    /// Refresh immediately, then on every interval
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.refresh_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !self.refresh().await {
                debug!("Conversion rate unchanged at {}", self.current());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn provider() -> RateProvider {
        let config = RateConfig {
            url: "http://127.0.0.1:9/rate".to_string(),
            ..RateConfig::default()
        };
        RateProvider::new(config, reqwest::Client::new())
    }

    #[test]
    fn test_parse_direct_and_table_shapes() {
        assert_eq!(parse_rate(r#"{"rate": 1385.25}"#, "KRW").unwrap(), d("1385.25"));
        assert_eq!(
            parse_rate(r#"{"base":"USD","rates":{"USD":1,"KRW":1390.5}}"#, "KRW").unwrap(),
            d("1390.5")
        );
    }

    #[test]
    fn test_parse_rejects_bad_rates() {
        assert!(parse_rate(r#"{"rates":{"USD":1}}"#, "KRW").is_err());
        assert!(parse_rate(r#"{"rate": 0}"#, "KRW").is_err());
        assert!(parse_rate(r#"{"rate": -3}"#, "KRW").is_err());
        assert!(parse_rate("<html>", "KRW").is_err());
    }

    #[test]
    fn test_starts_with_fallback() {
        let provider = provider();
        assert_eq!(provider.current(), d("1350"));
    }

    #[tokio::test]
    async fn test_notifies_only_on_change() {
        let provider = provider();
        let mut rx = provider.subscribe();

        assert!(!provider.update(d("1350")));
        assert!(!rx.has_changed().unwrap());

        assert!(provider.update(d("1372.4")));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), d("1372.4"));
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_default() {
        let provider = provider();
        let mut rx = provider.subscribe();
        provider.update(d("1400"));
        let _ = rx.borrow_and_update();

        assert!(provider.refresh().await);
        assert_eq!(provider.current(), d("1350"));
        assert!(rx.has_changed().unwrap());

        // Already at the default, nothing to announce
        assert!(!provider.refresh().await);
        assert_eq!(provider.current(), d("1350"));
    }
}
