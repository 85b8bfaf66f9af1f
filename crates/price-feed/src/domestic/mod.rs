//! Domestic exchange feeds
//!
//! A domestic source is either streaming ([`UpbitStream`]) or polling
//! ([`PollingFeed`]). Both write [`DomesticObservation`]s into the same store
//! shape, so the engine never knows which one is active.

pub mod polling;
pub mod upbit;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use premium_core::{
    DomesticConfig, DomesticExchange, DomesticObservation, FeedKind, FeedState, Symbol,
};

use crate::state::{DomesticStore, StoreSnapshot};

pub use polling::{PollingFeed, PollingVenue};
pub use upbit::UpbitStream;

/// Where a running source writes its observations and reports readiness
pub struct ObservationSink {
    exchange: DomesticExchange,
    store: DomesticStore,
    status: watch::Sender<FeedState>,
}

impl ObservationSink {
    pub fn new(exchange: DomesticExchange, store: DomesticStore, status: watch::Sender<FeedState>) -> Self {
        Self {
            exchange,
            store,
            status,
        }
    }

    /// Record one price
    pub fn publish(&self, symbol: Symbol, price: rust_decimal::Decimal) {
        self.publish_batch(std::iter::once((symbol, price)));
    }

    /// Record many prices in one store update
    pub fn publish_batch(
        &self,
        prices: impl IntoIterator<Item = (Symbol, rust_decimal::Decimal)>,
    ) -> usize {
        let observed_at_ms = chrono::Utc::now().timestamp_millis();
        let exchange = self.exchange;
        self.store.upsert_many(prices.into_iter().map(|(symbol, price)| {
            let observation = DomesticObservation {
                symbol: symbol.clone(),
                exchange,
                price,
                observed_at_ms,
            };
            (symbol, observation)
        }))
    }

    /// Move the lifecycle forward, ignoring transitions the state machine forbids
    pub fn set_state(&self, next: FeedState) -> bool {
        let exchange = self.exchange;
        self.status.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!("{} feed {:?} -> {:?}", exchange, state, next);
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Source is connected (streaming) or has completed a cycle (polling)
    pub fn mark_active(&self) {
        self.set_state(FeedState::Active);
    }

    pub fn state(&self) -> FeedState {
        *self.status.borrow()
    }
}

/// Capability shared by every domestic source
#[async_trait]
pub trait DomesticSource: Send {
    fn exchange(&self) -> DomesticExchange;

    /// Run until the transport fails or closes.
    ///
    /// Dropping the future tears the source down (socket closed, timer gone).
    async fn run(&mut self, sink: &ObservationSink) -> anyhow::Result<()>;
}

/// The closed set of domestic source variants
pub enum DomesticFeed {
    Streaming(UpbitStream),
    Polling(PollingFeed),
}

impl DomesticFeed {
    /// Build the variant that serves `exchange`
    pub fn for_exchange(
        exchange: DomesticExchange,
        config: &DomesticConfig,
        client: reqwest::Client,
    ) -> Self {
        match (exchange.feed_kind(), exchange) {
            (FeedKind::Streaming, _) => {
                DomesticFeed::Streaming(UpbitStream::new(config.upbit_ws_url.clone()))
            }
            (FeedKind::Polling, DomesticExchange::Coinone) => DomesticFeed::Polling(PollingFeed::new(
                PollingVenue::Coinone,
                config.coinone_url.clone(),
                config.poll_interval(),
                client,
            )),
            (FeedKind::Polling, _) => DomesticFeed::Polling(PollingFeed::new(
                PollingVenue::Bithumb,
                config.bithumb_url.clone(),
                config.poll_interval(),
                client,
            )),
        }
    }

    pub fn kind(&self) -> FeedKind {
        match self {
            DomesticFeed::Streaming(_) => FeedKind::Streaming,
            DomesticFeed::Polling(_) => FeedKind::Polling,
        }
    }
}

#[async_trait]
impl DomesticSource for DomesticFeed {
    fn exchange(&self) -> DomesticExchange {
        match self {
            DomesticFeed::Streaming(feed) => feed.exchange(),
            DomesticFeed::Polling(feed) => feed.exchange(),
        }
    }

    async fn run(&mut self, sink: &ObservationSink) -> anyhow::Result<()> {
        match self {
            DomesticFeed::Streaming(feed) => feed.run(sink).await,
            DomesticFeed::Polling(feed) => feed.run(sink).await,
        }
    }
}

/// Builds the source for a selected exchange
pub trait SourceFactory: Send + Sync {
    fn build(&self, exchange: DomesticExchange) -> Box<dyn DomesticSource>;
}

/// Production factory backed by the real exchange endpoints
pub struct ExchangeSourceFactory {
    config: DomesticConfig,
    client: reqwest::Client,
}

impl ExchangeSourceFactory {
    pub fn new(config: DomesticConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

impl SourceFactory for ExchangeSourceFactory {
    fn build(&self, exchange: DomesticExchange) -> Box<dyn DomesticSource> {
        Box::new(DomesticFeed::for_exchange(exchange, &self.config, self.client.clone()))
    }
}

/// A running domestic source
pub struct DomesticHandle {
    exchange: DomesticExchange,
    store: DomesticStore,
    status: watch::Receiver<FeedState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DomesticHandle {
    /// Spawn `source` writing into `store`
    pub fn spawn(mut source: Box<dyn DomesticSource>, store: DomesticStore) -> Self {
        let exchange = source.exchange();
        let (status_tx, status_rx) = watch::channel(FeedState::Idle);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let sink = ObservationSink::new(exchange, store.clone(), status_tx);

        let task = tokio::spawn(async move {
            sink.set_state(FeedState::Connecting);
            info!("Starting {} domestic feed", exchange);

            tokio::select! {
                result = source.run(&sink) => match result {
                    Ok(()) => info!("{} domestic feed closed", exchange),
                    Err(e) => error!("{} domestic feed error: {}", exchange, e),
                },
                _ = shutdown_rx => {
                    debug!("{} domestic feed shutting down", exchange);
                }
            }

            sink.set_state(FeedState::Closed);
        });

        Self {
            exchange,
            store,
            status: status_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn exchange(&self) -> DomesticExchange {
        self.exchange
    }

    pub fn state(&self) -> FeedState {
        *self.status.borrow()
    }

    pub fn status(&self) -> watch::Receiver<FeedState> {
        self.status.clone()
    }

    /// Latest observations written by this source
    pub fn latest_observations(&self) -> StoreSnapshot<DomesticObservation> {
        self.store.reader().snapshot()
    }

    /// Wait until the source is ready or has failed
    pub async fn settled(&self) -> FeedState {
        let mut status = self.status.clone();
        let settled = match status.wait_for(FeedState::is_settled).await {
            Ok(state) => *state,
            // Sender gone means the task has finished
            Err(_) => FeedState::Closed,
        };
        settled
    }

    /// Stop the source and wait until it can no longer write
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("{} domestic feed panicked: {}", self.exchange, e);
                } else {
                    warn!("{} domestic feed task cancelled: {}", self.exchange, e);
                }
            }
        }
    }
}

impl Drop for DomesticHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
