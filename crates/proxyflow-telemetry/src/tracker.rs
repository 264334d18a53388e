//! Pending-buffer batching with periodic and final flushes

use crate::TelemetryError;
use chrono::Utc;
use proxyflow_db::{AnalyticsSink, UsageAccounting, UsageRecord};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, error, info, warn};

/// Buffers usage records and flushes them to the analytics and accounting
/// sinks
///
/// Records are flushed every `flush_interval` by a background task, and
/// once more by [`close`](Self::close). Each flush claims the whole
/// pending buffer at once, so a record lands in exactly one batch.
pub struct UsageTracker {
    pending: Mutex<Vec<UsageRecord>>,
    analytics: Arc<dyn AnalyticsSink>,
    accounting: Arc<dyn UsageAccounting>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    flush_task: Mutex<Option<JoinHandle<Result<(), TelemetryError>>>>,
}

impl UsageTracker {
    /// Create a tracker and start its flush task
    ///
    /// The first periodic flush fires one full `flush_interval` after
    /// construction. A zero interval disables periodic flushing; records
    /// are then only flushed by explicit [`flush`](Self::flush) and
    /// [`close`](Self::close) calls.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        analytics: Arc<dyn AnalyticsSink>,
        accounting: Arc<dyn UsageAccounting>,
        flush_interval: Duration,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        Arc::new_cyclic(|tracker| {
            let task = tokio::spawn(run_flush_loop(
                tracker.clone(),
                flush_interval,
                shutdown_rx,
            ));

            Self {
                pending: Mutex::new(Vec::new()),
                analytics,
                accounting,
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                flush_task: Mutex::new(Some(task)),
            }
        })
    }

    /// Queue a finished connection's usage, stamping its end time
    pub fn record(&self, mut record: UsageRecord) {
        record.end_time = Utc::now().max(record.start_time);
        self.lock_pending().push(record);
    }

    /// Number of records waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Ship every pending record
    ///
    /// The analytics insert is best effort: a failure is logged and the
    /// flush carries on. Accounting runs once per distinct owner; if any
    /// owner's update fails the first such failure is returned after all
    /// owners have been attempted.
    pub async fn flush(&self) -> Result<(), TelemetryError> {
        let batch = std::mem::take(&mut *self.lock_pending());
        if batch.is_empty() {
            return Ok(());
        }

        debug!("Flushing {} usage records", batch.len());

        if let Err(e) = self.analytics.insert_batch(&batch).await {
            error!(
                "Failed to write {} usage records to analytics: {}",
                batch.len(),
                e
            );
        }

        let mut first_error = None;
        for (owner_id, bytes) in usage_by_owner(&batch) {
            if let Err(source) = self.accounting.increment_usage(owner_id, bytes).await {
                warn!(
                    "Usage update lost: owner {} bytes {} ({})",
                    owner_id, bytes, source
                );
                if first_error.is_none() {
                    first_error = Some(TelemetryError::Accounting {
                        owner_id,
                        bytes,
                        source,
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the flush task, flush what is left and release the analytics
    /// sink
    ///
    /// Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<(), TelemetryError> {
        let shutdown_tx = lock(&self.shutdown_tx).take();
        let Some(shutdown_tx) = shutdown_tx else {
            debug!("Usage tracker already closed");
            return Ok(());
        };

        // The task may already be gone if it panicked
        let _ = shutdown_tx.send(());

        let task = lock(&self.flush_task).take();
        let flushed = match task {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Usage flush task failed: {}", e);
                    // Records the task never got to
                    self.flush()
                        .await
                        .and(Err(TelemetryError::FlushTask(e.to_string())))
                }
            },
            None => self.flush().await,
        };

        let released = self
            .analytics
            .close()
            .await
            .map_err(TelemetryError::Analytics);

        info!("Usage tracker closed");
        flushed.and(released)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<UsageRecord>> {
        lock(&self.pending)
    }
}

/// Records are plain data, so a poisoned lock is still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sum `bytes_up + bytes_down` per owner
fn usage_by_owner(batch: &[UsageRecord]) -> BTreeMap<i32, u64> {
    let mut totals = BTreeMap::new();
    for record in batch {
        let total = totals.entry(record.owner_id).or_insert(0u64);
        *total = total.saturating_add(record.total_bytes());
    }
    totals
}

async fn run_flush_loop(
    tracker: Weak<UsageTracker>,
    flush_interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Result<(), TelemetryError> {
    let mut ticker = if flush_interval.is_zero() {
        None
    } else {
        Some(tokio::time::interval_at(
            Instant::now() + flush_interval,
            flush_interval,
        ))
    };

    loop {
        tokio::select! {
            // Fires on close, or when the tracker was dropped without it
            _ = &mut shutdown_rx => break,

            _ = tick(&mut ticker) => {
                let Some(tracker) = tracker.upgrade() else {
                    return Ok(());
                };
                if let Err(e) = tracker.flush().await {
                    error!("Periodic usage flush failed: {}", e);
                }
            }
        }
    }

    match tracker.upgrade() {
        Some(tracker) => tracker.flush().await,
        None => Ok(()),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
