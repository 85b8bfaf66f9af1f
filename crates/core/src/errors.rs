//! Error types

use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown domestic exchange: {0}")]
    UnknownExchange(String),

    #[error("Invalid conversion rate: {0}")]
    InvalidRate(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Feed errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Upstream returned status {status}")]
    Upstream { status: u16 },

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),
}

impl FeedError {
    /// Malformed single message; the connection stays open
    pub fn is_malformed(&self) -> bool {
        matches!(self, FeedError::InvalidMessage(_) | FeedError::UnknownInstrument(_))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::InvalidMessage(e.to_string())
    }
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type FeedResult<T> = Result<T, FeedError>;
