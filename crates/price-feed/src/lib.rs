//! Real-time premium aggregation
//!
//! Features:
//! - One Binance ticker stream for every tracked symbol
//! - Switchable domestic source (Upbit stream, Bithumb/Coinone bulk polling)
//! - Fixed-cadence merge into immutable snapshots
//! - Per-symbol price flash with independent decay windows
//! - Conversion rate published on change

pub mod coordinator;
pub mod domestic;
pub mod engine;
pub mod flash;
pub mod foreign;
pub mod monitor;
pub mod rate;
pub mod state;

pub use coordinator::{CoordinatorHandle, LifecycleCoordinator};
pub use domestic::{
    DomesticFeed, DomesticHandle, DomesticSource, ExchangeSourceFactory, ObservationSink,
    SourceFactory,
};
pub use engine::{merge, AggregationEngine, EngineHandle};
pub use flash::FlashTracker;
pub use foreign::BinanceFeed;
pub use monitor::{MonitorStats, PremiumMonitor};
pub use rate::RateProvider;
pub use state::{latest_store, StoreReader, StoreStats, StoreWriter};
