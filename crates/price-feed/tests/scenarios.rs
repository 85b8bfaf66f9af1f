//! End-to-end scenarios through the real engine, flash tracker and coordinator

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};

use premium_core::{
    symbols, DomesticExchange, EngineConfig, FeedState, FlashState, ForeignConfig, SelectionState,
    Symbol,
};
use premium_feed::domestic::{PollingFeed, PollingVenue};
use premium_feed::{
    latest_store, AggregationEngine, BinanceFeed, CoordinatorHandle, DomesticSource, EngineHandle,
    FlashTracker, LifecycleCoordinator, ObservationSink, SourceFactory,
};

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn stream_text(pair: &str, price: &str) -> String {
    format!(
        r#"{{"stream":"{}@ticker","data":{{"s":"{}","c":"{}","P":"0.15","h":"66000","l":"64000","v":"1000"}}}}"#,
        pair.to_ascii_lowercase(),
        pair,
        price
    )
}

/// Publishes a fixed price table once ready, then stays connected
struct ScriptedSource {
    exchange: DomesticExchange,
    prices: Vec<(Symbol, Decimal)>,
    ready_after: Duration,
}

#[async_trait]
impl DomesticSource for ScriptedSource {
    fn exchange(&self) -> DomesticExchange {
        self.exchange
    }

    async fn run(&mut self, sink: &ObservationSink) -> anyhow::Result<()> {
        tokio::time::sleep(self.ready_after).await;
        sink.publish_batch(self.prices.clone());
        sink.mark_active();
        std::future::pending::<()>().await;
        Ok(())
    }
}

struct ScriptedFactory {
    prices: HashMap<DomesticExchange, Vec<(Symbol, Decimal)>>,
    ready_after: HashMap<DomesticExchange, Duration>,
}

impl SourceFactory for ScriptedFactory {
    fn build(&self, exchange: DomesticExchange) -> Box<dyn DomesticSource> {
        Box::new(ScriptedSource {
            exchange,
            prices: self.prices.get(&exchange).cloned().unwrap_or_default(),
            ready_after: self.ready_after.get(&exchange).copied().unwrap_or_default(),
        })
    }
}

struct Harness {
    feed: BinanceFeed,
    flash: Arc<FlashTracker>,
    engine: EngineHandle,
    coordinator: CoordinatorHandle,
    _rate: watch::Sender<Decimal>,
}

fn harness(factory: ScriptedFactory) -> Harness {
    let config = EngineConfig::default();
    let (foreign_store, foreign) = latest_store();
    let (domestic_store, domestic) = latest_store();
    let (moves_tx, moves_rx) = mpsc::channel(64);
    let (rate, rate_rx) = watch::channel(d("1350"));
    let (selection, selection_rx) = watch::channel(SelectionState::default());

    let feed = BinanceFeed::new(
        ForeignConfig::default(),
        symbols::tracked_symbols(),
        reqwest::Client::new(),
        foreign_store,
        moves_tx,
    );

    let flash = Arc::new(FlashTracker::new(config.flash_decay()));
    let tracker = Arc::clone(&flash);
    tokio::spawn(async move { tracker.run(moves_rx).await });

    let (engine, engine_handle) =
        AggregationEngine::new(config.publish_interval(), foreign, domestic, rate_rx, selection_rx);
    tokio::spawn(engine.run());

    let (coordinator, coordinator_handle) = LifecycleCoordinator::new(
        Arc::new(factory),
        domestic_store,
        selection,
        engine_handle.clone(),
        &config,
    );
    tokio::spawn(coordinator.run());

    Harness {
        feed,
        flash,
        engine: engine_handle,
        coordinator: coordinator_handle,
        _rate: rate,
    }
}

fn ingest(harness: &Harness, pair: &str, price: &str) {
    let tick = premium_feed::foreign::parse_stream_message(&stream_text(pair, price)).unwrap();
    harness.feed.apply_tick(tick);
}

#[tokio::test(start_paused = true)]
async fn btc_premium_and_flash() {
    let btc = Symbol::new("BTC");
    let harness = harness(ScriptedFactory {
        prices: HashMap::from([(DomesticExchange::Bithumb, vec![(btc.clone(), d("87000000"))])]),
        ready_after: HashMap::new(),
    });

    ingest(&harness, "BTCUSDT", "65000.00");
    harness.coordinator.select(DomesticExchange::Bithumb).await.unwrap();
    harness.coordinator.loaded(DomesticExchange::Bithumb).await.unwrap();

    ingest(&harness, "BTCUSDT", "65100.00");
    harness.engine.refresh().await.unwrap();
    let flash_started = tokio::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let snapshot = harness.engine.snapshot();
    let record = snapshot.get(&btc).unwrap();
    let converted = d("65100.00") * d("1350");
    let expected = (d("87000000") - converted) / converted * Decimal::ONE_HUNDRED;
    assert_eq!(record.foreign_price, d("65100"));
    assert_eq!(record.domestic_price(), Some(d("87000000")));
    assert_eq!(record.premium_percent(), Some(expected));
    assert!(expected < d("-1") && expected > d("-1.1"));

    assert_eq!(harness.flash.state(&btc), FlashState::Up);

    // Unrelated symbols keep ticking during the window
    for price in ["3500", "3501", "3502", "3503"] {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ingest(&harness, "ETHUSDT", price);
    }

    tokio::time::sleep_until(flash_started + Duration::from_millis(499)).await;
    assert_eq!(harness.flash.state(&btc), FlashState::Up);

    tokio::time::sleep_until(flash_started + Duration::from_millis(501)).await;
    assert_eq!(harness.flash.state(&btc), FlashState::None);
}

#[tokio::test(start_paused = true)]
async fn failed_polls_keep_last_domestic_price() {
    let btc = Symbol::new("BTC");
    let (foreign_store, foreign) = latest_store();
    let (domestic_store, domestic) = latest_store();
    let (_rate, rate_rx) = watch::channel(d("1350"));
    let (_selection, selection_rx) = watch::channel(SelectionState {
        exchange: Some(DomesticExchange::Bithumb),
        loading: false,
    });
    let (engine, engine_handle) = AggregationEngine::new(
        Duration::from_millis(500),
        foreign,
        domestic,
        rate_rx,
        selection_rx,
    );
    tokio::spawn(engine.run());

    let tick = premium_feed::foreign::parse_stream_message(&stream_text("BTCUSDT", "65000")).unwrap();
    foreign_store.upsert(btc.clone(), tick);

    let (status, _status_rx) = watch::channel(FeedState::Connecting);
    let sink = ObservationSink::new(DomesticExchange::Bithumb, domestic_store, status);
    let poller = PollingFeed::new(
        PollingVenue::Bithumb,
        "http://127.0.0.1:9/unused".to_string(),
        Duration::from_millis(500),
        reqwest::Client::new(),
    );

    let body = r#"{"status":"0000","data":{"BTC":{"closing_price":"87000000"},"date":"1"}}"#;
    assert_eq!(poller.apply_cycle(Ok(body.to_string()), &sink), 1);
    engine_handle.refresh().await.unwrap();
    let before = engine_handle.snapshot().get(&btc).unwrap().domestic;
    assert_eq!(before.map(|q| q.price), Some(d("87000000")));

    assert_eq!(poller.apply_cycle(Err(anyhow::anyhow!("timed out")), &sink), 0);
    engine_handle.refresh().await.unwrap();
    assert_eq!(poller.apply_cycle(Err(anyhow::anyhow!("connection reset")), &sink), 0);
    engine_handle.refresh().await.unwrap();

    assert_eq!(engine_handle.snapshot().get(&btc).unwrap().domestic, before);
}

#[tokio::test(start_paused = true)]
async fn switch_hides_previous_exchange_prices() {
    let tracked = symbols::tracked_symbols();
    let table = |base: i64| -> Vec<(Symbol, Decimal)> {
        tracked
            .iter()
            .enumerate()
            .map(|(i, symbol)| (symbol.clone(), Decimal::from(base + i as i64)))
            .collect()
    };

    let harness = harness(ScriptedFactory {
        prices: HashMap::from([
            (DomesticExchange::Bithumb, table(1_000)),
            (DomesticExchange::Upbit, table(2_000)),
        ]),
        ready_after: HashMap::from([(DomesticExchange::Upbit, Duration::from_secs(2))]),
    });

    for symbol in &tracked {
        let pair = symbols::foreign_pair(symbol).unwrap();
        ingest(&harness, pair, "1");
    }

    harness.coordinator.select(DomesticExchange::Bithumb).await.unwrap();
    harness.coordinator.loaded(DomesticExchange::Bithumb).await.unwrap();
    harness.engine.refresh().await.unwrap();
    assert_eq!(harness.engine.snapshot().domestic_count(), tracked.len());

    let mut snapshots = harness.engine.subscribe();
    let _ = snapshots.borrow_and_update();
    harness.coordinator.select(DomesticExchange::Upbit).await.unwrap();

    // Every snapshot published under the new label, before Upbit's first
    // observation, has no domestic prices at all
    let deadline = tokio::time::Instant::now() + Duration::from_millis(1_900);
    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            changed = snapshots.changed() => {
                changed.unwrap();
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.exchange == Some(DomesticExchange::Upbit) {
                    assert_eq!(snapshot.domestic_count(), 0);
                    for record in snapshot.records.values() {
                        assert_eq!(record.domestic_price(), None);
                        assert_eq!(record.premium_percent(), None);
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
    assert!(harness.coordinator.selection().loading);

    harness.coordinator.loaded(DomesticExchange::Upbit).await.unwrap();
    harness.engine.refresh().await.unwrap();
    let snapshot = harness.engine.snapshot();
    assert_eq!(snapshot.exchange, Some(DomesticExchange::Upbit));
    assert_eq!(
        snapshot.get(&Symbol::new("BTC")).unwrap().domestic_price(),
        Some(Decimal::from(2_000))
    );
}
