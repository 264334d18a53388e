//! Usage telemetry for the proxyflow gateway
//!
//! Connection tasks hand finished [`UsageRecord`]s to a shared
//! [`UsageTracker`]. The tracker buffers them and periodically flushes the
//! buffer to two sinks: the analytics store (one row per connection) and
//! usage accounting (one increment per owner per flush).

mod tracker;

pub use proxyflow_db::{AnalyticsSink, StoreError, UsageAccounting, UsageRecord};
pub use tracker::UsageTracker;

use thiserror::Error;

/// Telemetry errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to account {bytes} bytes for owner {owner_id}: {source}")]
    Accounting {
        owner_id: i32,
        bytes: u64,
        #[source]
        source: StoreError,
    },

    #[error("Analytics sink error: {0}")]
    Analytics(#[source] StoreError),

    #[error("Flush task failed: {0}")]
    FlushTask(String),
}
