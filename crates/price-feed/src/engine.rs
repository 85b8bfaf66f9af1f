//! Aggregation engine
//!
//! The single writer of [`MarketSnapshot`]s. On a fixed cadence it reads the
//! latest foreign and domestic store snapshots, merges them into a fresh copy of
//! the previous snapshot and publishes it through a watch channel. A conversion
//! rate change triggers an immediate republish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use premium_core::{
    DomesticExchange, DomesticObservation, ForeignTick, MarketSnapshot, SelectionState, Symbol,
    TickerRecord,
};

use crate::state::{DomesticReader, ForeignReader};

/// Merge one round of store snapshots into a new snapshot.
///
/// `previous` is never touched. Records are created only from foreign ticks and
/// never removed. The domestic side is taken only from observations made on
/// `exchange`; anything else leaves it absent.
pub fn merge(
    previous: &MarketSnapshot,
    foreign: &HashMap<Symbol, ForeignTick>,
    domestic: &HashMap<Symbol, DomesticObservation>,
    rate: Decimal,
    exchange: Option<DomesticExchange>,
) -> MarketSnapshot {
    let mut records = previous.records.clone();

    for (symbol, tick) in foreign {
        records
            .entry(symbol.clone())
            .and_modify(|record| record.apply_tick(tick))
            .or_insert_with(|| TickerRecord::from_tick(tick));
    }

    for (symbol, record) in records.iter_mut() {
        let price = domestic
            .get(symbol)
            .filter(|observation| Some(observation.exchange) == exchange)
            .map(|observation| observation.price);
        record.set_domestic(price, rate);
    }

    MarketSnapshot {
        sequence: previous.sequence.wrapping_add(1),
        exchange,
        rate,
        records,
        published_at_ms: chrono::Utc::now().timestamp_millis(),
    }
}

/// Requests handled between publish ticks
#[derive(Debug)]
pub enum EngineCommand {
    /// Publish now and acknowledge with the new sequence number
    Refresh(oneshot::Sender<u64>),
}

/// Client side of a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    snapshots: watch::Receiver<Arc<MarketSnapshot>>,
}

impl EngineHandle {
    /// Force a publish and wait until it is visible to readers
    pub async fn refresh(&self) -> anyhow::Result<u64> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Refresh(ack_tx))
            .await
            .map_err(|_| anyhow::anyhow!("aggregation engine stopped"))?;
        Ok(ack_rx.await?)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<MarketSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MarketSnapshot>> {
        self.snapshots.clone()
    }
}

pub struct AggregationEngine {
    publish_interval: Duration,
    foreign: ForeignReader,
    domestic: DomesticReader,
    rate: watch::Receiver<Decimal>,
    selection: watch::Receiver<SelectionState>,
    snapshots: watch::Sender<Arc<MarketSnapshot>>,
    commands: mpsc::Receiver<EngineCommand>,
}

impl AggregationEngine {
    pub fn new(
        publish_interval: Duration,
        foreign: ForeignReader,
        domestic: DomesticReader,
        rate: watch::Receiver<Decimal>,
        selection: watch::Receiver<SelectionState>,
    ) -> (Self, EngineHandle) {
        let initial = MarketSnapshot {
            rate: *rate.borrow(),
            exchange: selection.borrow().exchange,
            ..MarketSnapshot::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(initial));
        let (command_tx, command_rx) = mpsc::channel(16);

        let engine = Self {
            publish_interval,
            foreign,
            domestic,
            rate,
            selection,
            snapshots: snapshot_tx,
            commands: command_rx,
        };
        let handle = EngineHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (engine, handle)
    }

    /// Read, merge and publish one snapshot. Returns its sequence number.
    pub fn publish(&mut self) -> u64 {
        let previous = Arc::clone(&self.snapshots.borrow());
        let rate = *self.rate.borrow_and_update();
        let exchange = self.selection.borrow().exchange;

        let next = merge(
            &previous,
            &self.foreign.snapshot(),
            &self.domestic.snapshot(),
            rate,
            exchange,
        );
        let sequence = next.sequence;
        self.snapshots.send_replace(Arc::new(next));
        sequence
    }

    /// Publish on every interval until every [`EngineHandle`] is dropped
    pub async fn run(mut self) {
        info!("Aggregation engine publishing every {:?}", self.publish_interval);

        let mut ticker = tokio::time::interval(self.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rate_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.publish();
                }
                changed = self.rate.changed(), if rate_open => {
                    if changed.is_ok() {
                        debug!("Rate changed, repricing");
                        self.publish();
                    } else {
                        rate_open = false;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(EngineCommand::Refresh(ack)) => {
                        let sequence = self.publish();
                        let _ = ack.send(sequence);
                    }
                    None => break,
                },
            }
        }

        debug!("Aggregation engine stopped");
    }
}
