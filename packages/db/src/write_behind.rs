//! Delayed-write plumbing for interfaces with `delay_cached_writes`.
//!
//! Writes are parked in a pending set and acknowledged immediately; a
//! dedicated worker drains the set into the database's batched write
//! path. Cache eviction only forwards the evicted key onto a channel, so
//! eviction never runs engine I/O inline and never holds a record lock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rampart_core::Record;
use tokio::sync::mpsc;
use tracing::warn;

use crate::registry::Registry;

/// How often the worker drains the pending set, independent of
/// evictions.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Pending-write state shared between an interface and its flush worker.
pub(crate) struct WriteBehind {
    db_name: String,
    pending: Arc<DashMap<String, Arc<dyn Record>>>,
    evicted: mpsc::UnboundedSender<String>,
}

impl WriteBehind {
    /// Spawns the flush worker and returns the shared state.
    pub(crate) fn start(registry: Arc<Registry>, db_name: String) -> Arc<Self> {
        let (evicted_tx, evicted_rx) = mpsc::unbounded_channel();
        let pending: Arc<DashMap<String, Arc<dyn Record>>> = Arc::new(DashMap::new());

        tokio::spawn(flush_worker(
            registry,
            db_name.clone(),
            Arc::clone(&pending),
            evicted_rx,
        ));

        Arc::new(Self {
            db_name,
            pending,
            evicted: evicted_tx,
        })
    }

    /// Whether this write-behind handles the given database.
    pub(crate) fn handles(&self, db_name: &str) -> bool {
        self.db_name == db_name
    }

    /// Parks a record for a later batched write.
    pub(crate) fn park(&self, db_key: String, record: Arc<dyn Record>) {
        self.pending.insert(db_key, record);
    }

    /// Called from the cache's eviction listener. Only forwards the key;
    /// the worker does the actual write.
    pub(crate) fn on_evict(&self, db_key: &str) {
        if self.pending.contains_key(db_key) {
            let _ = self.evicted.send(db_key.to_string());
        }
    }

    /// Drains all pending records through the database's batch path.
    pub(crate) async fn flush(&self, registry: &Arc<Registry>) {
        flush_pending(registry, &self.db_name, &self.pending).await;
    }

    /// Number of records awaiting their batched write.
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

async fn flush_worker(
    registry: Arc<Registry>,
    db_name: String,
    pending: Arc<DashMap<String, Arc<dyn Record>>>,
    mut evicted: mpsc::UnboundedReceiver<String>,
) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut shutdown = registry.shutdown_receiver();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush_pending(&registry, &db_name, &pending).await;
            }
            evicted_key = evicted.recv() => {
                if evicted_key.is_none() {
                    // Interface dropped: final drain, then stop.
                    flush_pending(&registry, &db_name, &pending).await;
                    return;
                }
                flush_pending(&registry, &db_name, &pending).await;
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn flush_pending(
    registry: &Arc<Registry>,
    db_name: &str,
    pending: &DashMap<String, Arc<dyn Record>>,
) {
    if pending.is_empty() {
        return;
    }
    let controller = match registry.controller(db_name).await {
        Ok(controller) => controller,
        Err(err) => {
            warn!(db = db_name, %err, "delayed write flush skipped");
            return;
        }
    };

    let keys: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
    let mut batch = controller.put_many();
    for key in keys {
        let Some((key, record)) = pending.remove(&key) else {
            continue;
        };
        if let Err(err) = batch.send(Arc::clone(&record)).await {
            // Put the record back so the next flush retries it.
            pending.insert(key, record);
            warn!(db = db_name, %err, "delayed write batch aborted");
            return;
        }
    }
    if let Err(err) = batch.finish().await {
        warn!(db = db_name, %err, "delayed write batch failed");
    }
}
