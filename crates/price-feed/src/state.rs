//! Adapter-local price stores
//!
//! Each adapter owns the writer half of a store and publishes immutable
//! `Arc<HashMap>` snapshots through a watch channel. The aggregation engine only
//! ever holds the reader half, so it never sees a map while it is being mutated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::watch;

use premium_core::{DomesticObservation, ForeignTick, Symbol};

/// Immutable view of a store
pub type StoreSnapshot<T> = Arc<HashMap<Symbol, T>>;

pub type ForeignStore = StoreWriter<ForeignTick>;
pub type ForeignReader = StoreReader<ForeignTick>;
pub type DomesticStore = StoreWriter<DomesticObservation>;
pub type DomesticReader = StoreReader<DomesticObservation>;

#[derive(Debug)]
struct StoreStatsInner {
    update_count: AtomicU64,
    last_update: RwLock<Option<Instant>>,
}

/// Writer half.
///
/// Cloning hands the writer to a new adapter instance; the lifecycle
/// coordinator guarantees only one instance is running at a time.
#[derive(Debug, Clone)]
pub struct StoreWriter<T> {
    tx: Arc<watch::Sender<StoreSnapshot<T>>>,
    stats: Arc<StoreStatsInner>,
}

/// Reader half, cheap to clone
#[derive(Debug, Clone)]
pub struct StoreReader<T> {
    rx: watch::Receiver<StoreSnapshot<T>>,
    stats: Arc<StoreStatsInner>,
}

/// Create a connected writer/reader pair
pub fn latest_store<T: Clone>() -> (StoreWriter<T>, StoreReader<T>) {
    let (tx, rx) = watch::channel(Arc::new(HashMap::new()));
    let stats = Arc::new(StoreStatsInner {
        update_count: AtomicU64::new(0),
        last_update: RwLock::new(None),
    });

    (
        StoreWriter {
            tx: Arc::new(tx),
            stats: Arc::clone(&stats),
        },
        StoreReader { rx, stats },
    )
}

impl<T: Clone> StoreWriter<T> {
    /// Replace the latest value for one symbol
    pub fn upsert(&self, symbol: Symbol, value: T) {
        self.upsert_many(std::iter::once((symbol, value)));
    }

    /// Replace several symbols in one published step
    pub fn upsert_many(&self, values: impl IntoIterator<Item = (Symbol, T)>) -> usize {
        let mut count = 0;
        self.tx.send_if_modified(|snapshot| {
            let map = Arc::make_mut(snapshot);
            for (symbol, value) in values {
                map.insert(symbol, value);
                count += 1;
            }
            count > 0
        });

        if count > 0 {
            self.stats.update_count.fetch_add(count as u64, Ordering::Relaxed);
            *self.stats.last_update.write() = Some(Instant::now());
        }
        count
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.is_empty() {
                return false;
            }
            *snapshot = Arc::new(HashMap::new());
            true
        });
    }

    pub fn get(&self, symbol: &Symbol) -> Option<T> {
        self.tx.borrow().get(symbol).cloned()
    }

    pub fn reader(&self) -> StoreReader<T> {
        StoreReader {
            rx: self.tx.subscribe(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T: Clone> StoreReader<T> {
    /// Latest published snapshot
    pub fn snapshot(&self) -> StoreSnapshot<T> {
        Arc::clone(&self.rx.borrow())
    }

    pub fn get(&self, symbol: &Symbol) -> Option<T> {
        self.rx.borrow().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.rx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.len(),
            update_count: self.stats.update_count.load(Ordering::Relaxed),
            last_update: *self.stats.last_update.read(),
        }
    }
}

/// Statistics about a store
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub entries: usize,
    pub update_count: u64,
    pub last_update: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_are_immutable() {
        let (writer, reader) = latest_store::<u32>();
        writer.upsert(Symbol::new("BTC"), 1);

        let before = reader.snapshot();
        writer.upsert(Symbol::new("BTC"), 2);
        writer.upsert(Symbol::new("ETH"), 3);

        assert_eq!(before.get(&Symbol::new("BTC")), Some(&1));
        assert_eq!(before.len(), 1);
        assert_eq!(reader.get(&Symbol::new("BTC")), Some(2));
        assert_eq!(reader.len(), 2);
    }

    #[test]
    fn test_batch_and_clear() {
        let (writer, reader) = latest_store::<u32>();
        let written = writer.upsert_many(vec![
            (Symbol::new("BTC"), 1),
            (Symbol::new("ETH"), 2),
        ]);
        assert_eq!(written, 2);
        assert_eq!(reader.stats().update_count, 2);

        writer.clear();
        assert!(reader.is_empty());
        assert_eq!(writer.get(&Symbol::new("BTC")), None);
    }

    #[test]
    fn test_empty_batch_does_not_count() {
        let (writer, reader) = latest_store::<u32>();
        assert_eq!(writer.upsert_many(Vec::new()), 0);
        assert_eq!(reader.stats().update_count, 0);
        assert!(reader.stats().last_update.is_none());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        use std::thread;

        let (writer, reader) = latest_store::<u64>();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let writer = writer.clone();
                let reader = reader.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        writer.upsert(Symbol::new(format!("S{}", i)), j);
                        let _ = reader.snapshot();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(reader.stats().update_count, 400);
        assert_eq!(reader.get(&Symbol::new("S3")), Some(99));
    }
}
