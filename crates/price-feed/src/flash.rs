//! Per-symbol price flash
//!
//! Consumes [`PriceMove`] events from the foreign feed and keeps an
//! Up/Down signal per symbol for exactly one decay window after its most
//! recent move. Deadlines are tracked per symbol, so a tick on one symbol
//! never shortens or extends another symbol's window.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use premium_core::{FlashState, PriceMove, Symbol};

#[derive(Debug, Clone, Copy)]
struct FlashEntry {
    state: FlashState,
    expires_at: Instant,
}

/// Flash state store, written by one tracker task and read by any number of renderers
#[derive(Debug)]
pub struct FlashTracker {
    decay: Duration,
    entries: DashMap<Symbol, FlashEntry>,
    version: watch::Sender<u64>,
}

impl FlashTracker {
    pub fn new(decay: Duration) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            decay,
            entries: DashMap::new(),
            version,
        }
    }

    /// Current flash for a symbol. Expired entries read as `None` even
    /// before the tracker task has swept them.
    pub fn state(&self, symbol: &Symbol) -> FlashState {
        self.entries
            .get(symbol)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// All symbols currently flashing
    pub fn active(&self) -> HashMap<Symbol, FlashState> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now && entry.state != FlashState::None)
            .map(|entry| (entry.key().clone(), entry.state))
            .collect()
    }

    /// Notified whenever any flash starts or ends
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Start (or restart) the window for one symbol. Returns its deadline.
    pub fn record(&self, price_move: &PriceMove) -> Instant {
        let expires_at = Instant::now() + self.decay;
        self.entries.insert(
            price_move.symbol.clone(),
            FlashEntry {
                state: price_move.direction.into(),
                expires_at,
            },
        );
        self.bump();
        expires_at
    }

    /// Revert every entry whose window has passed. Returns how many reverted.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut reverted = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.state != FlashState::None && entry.expires_at <= now {
                entry.state = FlashState::None;
                reverted += 1;
            }
        }
        if reverted > 0 {
            self.bump();
        }
        reverted
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Consume price moves until the channel closes
    pub async fn run(&self, mut moves: mpsc::Receiver<PriceMove>) {
        let mut deadlines: HashMap<Symbol, Instant> = HashMap::new();

        loop {
            let next = deadlines.values().min().copied();

            tokio::select! {
                received = moves.recv() => match received {
                    Some(price_move) => {
                        debug!("Flash {:?} for {}", price_move.direction, price_move.symbol);
                        let expires_at = self.record(&price_move);
                        deadlines.insert(price_move.symbol, expires_at);
                    }
                    None => break,
                },
                _ = wait_until(next) => {
                    let now = Instant::now();
                    self.sweep(now);
                    deadlines.retain(|_, deadline| *deadline > now);
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
