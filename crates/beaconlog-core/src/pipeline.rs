//! Detection batches to stored rows.
//!
//! The range notifier runs on the ranging stack's task and must return
//! quickly, so it only stamps the batch and hands it to a writer task. The
//! writer inserts batches one at a time on the blocking pool, in delivery
//! order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::bluetooth::{Beacon, BluetoothResult, RangingSource, Region};
use crate::clock::Clock;
use crate::storage::BeaconStore;
use crate::types::NewObservation;

type Batch = Vec<NewObservation>;

struct Writer {
    tx: mpsc::UnboundedSender<Batch>,
    task: JoinHandle<()>,
}

/// Subscribes to detection batches and persists them.
pub struct BeaconObservationPipeline {
    source: Arc<dyn RangingSource>,
    store: Arc<BeaconStore>,
    clock: Arc<dyn Clock>,
    region: Region,
    writer: Mutex<Option<Writer>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BeaconObservationPipeline {
    /// Create an unsubscribed pipeline.
    pub fn new(
        source: Arc<dyn RangingSource>,
        store: Arc<BeaconStore>,
        clock: Arc<dyn Clock>,
        region: Region,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            region,
            writer: Mutex::new(None),
        }
    }

    /// Region this pipeline ranges over.
    #[must_use]
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Whether a notifier is currently registered.
    #[must_use]
    pub fn has_subscriber(&self) -> bool {
        lock(&self.writer).is_some()
    }

    fn writer_sender(&self) -> mpsc::UnboundedSender<Batch> {
        let mut slot = lock(&self.writer);
        if let Some(writer) = slot.as_ref() {
            return writer.tx.clone();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Batch>();
        let store = Arc::clone(&self.store);
        let task = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || write_batch(&store, batch)).await {
                    Ok(written) => trace!(written, "Batch written"),
                    Err(e) => error!(error = %e, "Observation writer panicked"),
                }
            }
            debug!("Observation writer drained");
        });
        *slot = Some(Writer {
            tx: tx.clone(),
            task,
        });
        tx
    }

    /// Register a batch notifier and start region-wide ranging.
    ///
    /// Not idempotent: a second call while subscribed adds a second notifier
    /// and every batch is then stored twice.
    ///
    /// # Errors
    ///
    /// Returns the ranging stack's error if ranging cannot start. The notifier
    /// is removed again in that case.
    pub async fn subscribe(&self) -> BluetoothResult<()> {
        let weak = self.writer_sender().downgrade();
        let clock = Arc::clone(&self.clock);

        self.source
            .add_range_notifier(Arc::new(move |beacons: Vec<Beacon>, region: &Region| {
                if beacons.is_empty() {
                    debug!(region = %region.unique_id, "No beacons found");
                    return;
                }
                let captured_at = clock.now_secs();
                let batch: Batch = beacons
                    .iter()
                    .map(|beacon| NewObservation::from_beacon(beacon, captured_at))
                    .collect();
                debug!(beacons = batch.len(), captured_at, "Range batch received");
                match weak.upgrade() {
                    Some(tx) => {
                        if tx.send(batch).is_err() {
                            warn!("Observation writer closed, batch dropped");
                        }
                    }
                    None => trace!("Batch after unsubscribe, dropped"),
                }
            }));

        if let Err(e) = self.source.start_ranging(self.region.clone()).await {
            error!(error = %e, "Unable to start beacon ranging");
            self.source.remove_all_range_notifiers();
            self.shutdown_writer().await;
            return Err(e);
        }
        info!(region = %self.region.unique_id, "Subscribed to range notifications");
        Ok(())
    }

    /// Stop ranging, drop the notifier and wait for queued batches to land.
    ///
    /// A no-op when not subscribed.
    pub async fn unsubscribe(&self) {
        if !self.has_subscriber() {
            trace!("Unsubscribe without subscriber");
            return;
        }
        if let Err(e) = self.source.stop_ranging(&self.region).await {
            warn!(error = %e, "Stopping ranging failed");
        }
        self.source.remove_all_range_notifiers();
        self.shutdown_writer().await;
        info!(region = %self.region.unique_id, "Unsubscribed from range notifications");
    }

    async fn shutdown_writer(&self) {
        let writer = lock(&self.writer).take();
        if let Some(Writer { tx, task }) = writer {
            drop(tx);
            if let Err(e) = task.await {
                error!(error = %e, "Observation writer failed");
            }
        }
    }
}

/// Insert each row independently; a failed row is logged and skipped.
fn write_batch(store: &BeaconStore, batch: Batch) -> usize {
    let mut written = 0;
    for observation in &batch {
        match store.insert(observation) {
            Ok(_) => written += 1,
            Err(e) => warn!(error = %e, uuid = %observation.uuid, "Failed to store observation"),
        }
    }
    written
}
