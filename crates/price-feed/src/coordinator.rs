//! Domestic source lifecycle
//!
//! The coordinator is the only task that starts or stops a domestic source.
//! A switch always runs in this order: enter loading, stop the old source and
//! wait for it to close, clear the domestic store, publish a snapshot without
//! domestic prices, then start the new source. Loading ends once the new source
//! settles (bounded by `max_loading`) but never before `min_loading` has passed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use premium_core::{DomesticExchange, EngineConfig, FeedState, SelectionState};

use crate::domestic::{DomesticHandle, SourceFactory};
use crate::engine::EngineHandle;
use crate::state::DomesticStore;

#[derive(Debug)]
pub enum CoordinatorCommand {
    Switch(DomesticExchange),
    Shutdown(oneshot::Sender<()>),
}

/// Client side of a running coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<CoordinatorCommand>,
    selection: watch::Receiver<SelectionState>,
}

impl CoordinatorHandle {
    /// Request a switch to `exchange`. Returns once the request is queued.
    pub async fn select(&self, exchange: DomesticExchange) -> anyhow::Result<()> {
        self.commands
            .send(CoordinatorCommand::Switch(exchange))
            .await
            .map_err(|_| anyhow::anyhow!("lifecycle coordinator stopped"))
    }

    pub fn selection(&self) -> SelectionState {
        *self.selection.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SelectionState> {
        self.selection.clone()
    }

    /// Wait until `exchange` is selected and no longer loading
    pub async fn loaded(&self, exchange: DomesticExchange) -> anyhow::Result<SelectionState> {
        let mut selection = self.selection.clone();
        let state = selection
            .wait_for(|s| s.exchange == Some(exchange) && !s.loading)
            .await?;
        Ok(*state)
    }

    /// Stop the active source and wait until it is gone
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(CoordinatorCommand::Shutdown(ack_tx))
            .await
            .map_err(|_| anyhow::anyhow!("lifecycle coordinator stopped"))?;
        Ok(ack_rx.await?)
    }
}

pub struct LifecycleCoordinator {
    factory: Arc<dyn SourceFactory>,
    store: DomesticStore,
    selection: watch::Sender<SelectionState>,
    engine: EngineHandle,
    min_loading: Duration,
    max_loading: Duration,
    commands: mpsc::Receiver<CoordinatorCommand>,
    active: Option<DomesticHandle>,
}

impl LifecycleCoordinator {
    pub fn new(
        factory: Arc<dyn SourceFactory>,
        store: DomesticStore,
        selection: watch::Sender<SelectionState>,
        engine: EngineHandle,
        config: &EngineConfig,
    ) -> (Self, CoordinatorHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let handle = CoordinatorHandle {
            commands: command_tx,
            selection: selection.subscribe(),
        };

        let coordinator = Self {
            factory,
            store,
            selection,
            engine,
            min_loading: config.min_loading(),
            max_loading: config.max_loading(),
            commands: command_rx,
            active: None,
        };
        (coordinator, handle)
    }

    /// Process commands until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let mut pending: Option<CoordinatorCommand> = None;

        loop {
            let command = match pending.take() {
                Some(command) => command,
                None => match self.commands.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                CoordinatorCommand::Switch(exchange) => {
                    pending = self.switch_to(exchange).await;
                }
                CoordinatorCommand::Shutdown(ack) => {
                    self.teardown().await;
                    let _ = ack.send(());
                    return;
                }
            }
        }

        self.teardown().await;
    }

    fn is_serving(&self, exchange: DomesticExchange) -> bool {
        self.active
            .as_ref()
            .map(|handle| handle.exchange() == exchange && handle.state() != FeedState::Closed)
            .unwrap_or(false)
    }

    /// Run one switch. Returns a command that arrived while loading and cut it short.
    async fn switch_to(&mut self, exchange: DomesticExchange) -> Option<CoordinatorCommand> {
        if self.is_serving(exchange) && !self.selection.borrow().loading {
            debug!("{} already selected", exchange);
            return None;
        }

        let started = Instant::now();
        info!("Switching domestic exchange to {}", exchange);
        self.selection.send_modify(|s| s.loading = true);

        if let Some(previous) = self.active.take() {
            debug!("Stopping {} domestic feed", previous.exchange());
            previous.stop().await;
        }
        self.store.clear();
        self.selection.send_replace(SelectionState {
            exchange: Some(exchange),
            loading: true,
        });
        if let Err(e) = self.engine.refresh().await {
            warn!("Could not publish cleared snapshot: {}", e);
        }

        let handle = DomesticHandle::spawn(self.factory.build(exchange), self.store.clone());

        let interrupted = tokio::select! {
            state = handle.settled() => {
                debug!("{} settled as {:?} after {:?}", exchange, state, started.elapsed());
                None
            }
            _ = sleep_until(started + self.max_loading) => {
                warn!("{} not ready after {:?}, ending loading", exchange, self.max_loading);
                None
            }
            command = self.commands.recv() => command,
        };
        self.active = Some(handle);
        if interrupted.is_some() {
            return interrupted;
        }

        let interrupted = tokio::select! {
            _ = sleep_until(started + self.min_loading) => None,
            command = self.commands.recv() => command,
        };
        if interrupted.is_some() {
            return interrupted;
        }

        self.selection.send_modify(|s| s.loading = false);
        info!("{} domestic feed selected", exchange);
        None
    }

    async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            info!("Stopping {} domestic feed", active.exchange());
            active.stop().await;
        }
        self.store.clear();
        self.selection.send_modify(|s| s.loading = false);
    }
}
