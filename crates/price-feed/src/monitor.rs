//! Premium monitor - wires every feed, the engine and the coordinator together

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use premium_core::{
    symbols, DomesticExchange, FlashState, MarketSnapshot, MonitorConfig, PriceMove,
    SelectionState, Symbol,
};

use crate::coordinator::{CoordinatorHandle, LifecycleCoordinator};
use crate::domestic::{ExchangeSourceFactory, SourceFactory};
use crate::engine::{AggregationEngine, EngineHandle};
use crate::flash::FlashTracker;
use crate::foreign::BinanceFeed;
use crate::rate::RateProvider;
use crate::state::{latest_store, DomesticReader, ForeignReader};

const MOVE_CHANNEL_CAPACITY: usize = 1_024;
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Tasks built in `new` and spawned by `start`
struct PendingTasks {
    engine: AggregationEngine,
    coordinator: LifecycleCoordinator,
    moves_rx: mpsc::Receiver<PriceMove>,
}

/// Main entry point of the aggregation core
pub struct PremiumMonitor {
    config: MonitorConfig,
    foreign_feed: Arc<BinanceFeed>,
    foreign: ForeignReader,
    domestic: DomesticReader,
    rate: Arc<RateProvider>,
    flash: Arc<FlashTracker>,
    engine: EngineHandle,
    coordinator: CoordinatorHandle,
    pending: Option<PendingTasks>,
    handles: Vec<JoinHandle<()>>,
    running: Arc<RwLock<bool>>,
}

impl PremiumMonitor {
    /// Monitor backed by the real exchange endpoints
    pub fn new(config: MonitorConfig) -> Self {
        let client = reqwest::Client::new();
        let factory = Arc::new(ExchangeSourceFactory::new(config.domestic.clone(), client.clone()));
        Self::with_factory(config, client, factory)
    }

    /// Monitor whose domestic sources come from `factory`
    pub fn with_factory(
        config: MonitorConfig,
        client: reqwest::Client,
        factory: Arc<dyn SourceFactory>,
    ) -> Self {
        let (foreign_store, foreign) = latest_store();
        let (domestic_store, domestic) = latest_store();
        let (moves_tx, moves_rx) = mpsc::channel(MOVE_CHANNEL_CAPACITY);
        let (selection_tx, selection_rx) = watch::channel(SelectionState::default());

        let rate = Arc::new(RateProvider::new(config.rate.clone(), client.clone()));
        let flash = Arc::new(FlashTracker::new(config.engine.flash_decay()));
        let foreign_feed = Arc::new(BinanceFeed::new(
            config.foreign.clone(),
            symbols::tracked_symbols(),
            client,
            foreign_store,
            moves_tx,
        ));

        let (engine, engine_handle) = AggregationEngine::new(
            config.engine.publish_interval(),
            foreign.clone(),
            domestic.clone(),
            rate.subscribe(),
            selection_rx,
        );
        let (coordinator, coordinator_handle) = LifecycleCoordinator::new(
            factory,
            domestic_store,
            selection_tx,
            engine_handle.clone(),
            &config.engine,
        );

        Self {
            config,
            foreign_feed,
            foreign,
            domestic,
            rate,
            flash,
            engine: engine_handle,
            coordinator: coordinator_handle,
            pending: Some(PendingTasks {
                engine,
                coordinator,
                moves_rx,
            }),
            handles: vec![],
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Seed the foreign store, start every task and select the initial exchange.
    ///
    /// A monitor can only be started once.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.config.validate()?;
        let Some(pending) = self.pending.take() else {
            anyhow::bail!("premium monitor already started");
        };

        info!("Starting premium monitor");
        *self.running.write().await = true;

        self.foreign_feed.seed().await;

        let feed = Arc::clone(&self.foreign_feed);
        self.handles.push(tokio::spawn(async move { feed.run().await }));

        let rate = Arc::clone(&self.rate);
        self.handles.push(tokio::spawn(async move { rate.run().await }));

        let flash = Arc::clone(&self.flash);
        let moves_rx = pending.moves_rx;
        self.handles.push(tokio::spawn(async move { flash.run(moves_rx).await }));

        self.handles.push(tokio::spawn(pending.engine.run()));
        self.handles.push(tokio::spawn(pending.coordinator.run()));

        self.coordinator
            .select(self.config.domestic.initial_exchange)
            .await?;

        // Periodic stats log
        let foreign = self.foreign.clone();
        let domestic = self.domestic.clone();
        let engine = self.engine.clone();
        let running = Arc::clone(&self.running);
        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            interval.tick().await;

            loop {
                interval.tick().await;

                if !*running.read().await {
                    break;
                }

                let snapshot = engine.snapshot();
                info!(
                    "Monitor: {} records ({} with domestic), {} foreign updates, {} domestic updates",
                    snapshot.len(),
                    snapshot.domestic_count(),
                    foreign.stats().update_count,
                    domestic.stats().update_count
                );
            }
        }));

        Ok(())
    }

    /// Stop the domestic source and every background task
    pub async fn stop(&mut self) {
        if !*self.running.read().await {
            return;
        }
        info!("Stopping premium monitor");
        *self.running.write().await = false;

        if let Err(e) = self.coordinator.shutdown().await {
            warn!("Lifecycle coordinator did not shut down cleanly: {}", e);
        }

        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Switch the domestic exchange
    pub async fn select_exchange(&self, exchange: DomesticExchange) -> anyhow::Result<()> {
        self.coordinator.select(exchange).await
    }

    /// Wait until `exchange` is selected and its loading period is over
    pub async fn wait_until_loaded(&self, exchange: DomesticExchange) -> anyhow::Result<SelectionState> {
        self.coordinator.loaded(exchange).await
    }

    pub fn selection(&self) -> SelectionState {
        self.coordinator.selection()
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<SelectionState> {
        self.coordinator.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<MarketSnapshot> {
        self.engine.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MarketSnapshot>> {
        self.engine.subscribe()
    }

    pub fn flash_state(&self, symbol: &Symbol) -> FlashState {
        self.flash.state(symbol)
    }

    pub fn active_flashes(&self) -> HashMap<Symbol, FlashState> {
        self.flash.active()
    }

    pub fn rate(&self) -> Decimal {
        self.rate.current()
    }

    /// The foreign adapter, for feeding ticks from outside the stream
    pub fn foreign_feed(&self) -> Arc<BinanceFeed> {
        Arc::clone(&self.foreign_feed)
    }

    pub fn stats(&self) -> MonitorStats {
        let snapshot = self.engine.snapshot();
        let foreign = self.foreign.stats();
        let domestic = self.domestic.stats();
        let selection = self.coordinator.selection();

        let snapshot_age = (snapshot.published_at_ms > 0)
            .then(|| chrono::Utc::now().timestamp_millis() - snapshot.published_at_ms)
            .and_then(|age_ms| u64::try_from(age_ms).ok())
            .map(Duration::from_millis);

        MonitorStats {
            task_count: self.handles.len(),
            record_count: snapshot.len(),
            domestic_count: snapshot.domestic_count(),
            foreign_symbols: foreign.entries,
            foreign_updates: foreign.update_count,
            domestic_symbols: domestic.entries,
            domestic_updates: domestic.update_count,
            snapshot_sequence: snapshot.sequence,
            snapshot_age,
            rate: self.rate.current(),
            exchange: selection.exchange,
            loading: selection.loading,
        }
    }
}

impl Drop for PremiumMonitor {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

/// Monitor statistics
#[derive(Debug, Clone)]
pub struct MonitorStats {
    pub task_count: usize,
    pub record_count: usize,
    pub domestic_count: usize,
    pub foreign_symbols: usize,
    pub foreign_updates: u64,
    pub domestic_symbols: usize,
    pub domestic_updates: u64,
    pub snapshot_sequence: u64,
    pub snapshot_age: Option<Duration>,
    pub rate: Decimal,
    pub exchange: Option<DomesticExchange>,
    pub loading: bool,
}
