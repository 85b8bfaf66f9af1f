//! Configuration types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{CoreError, CoreResult, DomesticExchange};

/// Foreign exchange (Binance) endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForeignConfig {
    pub rest_url: String,
    pub ws_url: String,
    /// Reconnects after an unexpected close; 0 disables reconnection
    pub reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
}

impl Default for ForeignConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443".to_string(),
            reconnect_attempts: 0,
            reconnect_base_delay_ms: 1_000,
        }
    }
}

impl ForeignConfig {
    pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

    /// Exponential backoff for the given 1-based attempt, capped at 30s
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.reconnect_base_delay_ms.saturating_mul(factor))
            .min(Self::MAX_RECONNECT_DELAY)
    }
}

/// Domestic exchange endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomesticConfig {
    pub initial_exchange: DomesticExchange,
    pub bithumb_url: String,
    pub coinone_url: String,
    pub upbit_ws_url: String,
    pub poll_interval_ms: u64,
}

impl Default for DomesticConfig {
    fn default() -> Self {
        Self {
            initial_exchange: DomesticExchange::Bithumb,
            bithumb_url: "https://api.bithumb.com/public/ticker/ALL_KRW".to_string(),
            coinone_url: "https://api.coinone.co.kr/public/v2/ticker_new/KRW".to_string(),
            upbit_ws_url: "wss://api.upbit.com/websocket/v1".to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl DomesticConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Conversion rate service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    pub url: String,
    pub quote_currency: String,
    pub default_rate: Decimal,
    pub refresh_interval_ms: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            url: "https://api.exchangerate-api.com/v4/latest/USD".to_string(),
            quote_currency: "KRW".to_string(),
            default_rate: Decimal::from(1350),
            refresh_interval_ms: 60_000,
        }
    }
}

impl RateConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Aggregation and lifecycle timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub publish_interval_ms: u64,
    pub flash_decay_ms: u64,
    pub min_loading_ms: u64,
    pub max_loading_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 500,
            flash_decay_ms: 500,
            min_loading_ms: 200,
            max_loading_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn flash_decay(&self) -> Duration {
        Duration::from_millis(self.flash_decay_ms)
    }

    pub fn min_loading(&self) -> Duration {
        Duration::from_millis(self.min_loading_ms)
    }

    pub fn max_loading(&self) -> Duration {
        Duration::from_millis(self.max_loading_ms)
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub foreign: ForeignConfig,
    pub domestic: DomesticConfig,
    pub rate: RateConfig,
    pub engine: EngineConfig,
}

impl MonitorConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.rate.default_rate <= Decimal::ZERO {
            return Err(CoreError::InvalidRate(self.rate.default_rate.to_string()));
        }

        let intervals = [
            ("domestic.poll_interval_ms", self.domestic.poll_interval_ms),
            ("rate.refresh_interval_ms", self.rate.refresh_interval_ms),
            ("engine.publish_interval_ms", self.engine.publish_interval_ms),
            ("engine.flash_decay_ms", self.engine.flash_decay_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(CoreError::InvalidConfig(format!("{} must be positive", name)));
            }
        }

        if self.engine.max_loading_ms < self.engine.min_loading_ms {
            return Err(CoreError::InvalidConfig(
                "engine.max_loading_ms must not be below engine.min_loading_ms".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.publish_interval(), Duration::from_millis(500));
        assert_eq!(config.domestic.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.foreign.reconnect_attempts, 0);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = MonitorConfig::default();
        config.rate.default_rate = Decimal::ZERO;
        assert!(matches!(config.validate(), Err(CoreError::InvalidRate(_))));

        let mut config = MonitorConfig::default();
        config.engine.max_loading_ms = 100;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_reconnect_backoff_is_bounded() {
        let config = ForeignConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(config.reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(config.reconnect_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"domestic": {"initial_exchange": "upbit"}}"#).unwrap();
        assert_eq!(config.domestic.initial_exchange, DomesticExchange::Upbit);
        assert_eq!(config.domestic.poll_interval_ms, 500);
        assert_eq!(config.rate.default_rate, Decimal::from(1350));
    }
}
