//! Usage records and the two sinks they are flushed to
//!
//! - [`UsageAccounting`] increments a per-owner usage counter (billing)
//! - [`AnalyticsSink`] stores one row per tunnelled connection

use crate::entities::{request_log, subscription};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use tracing::{debug, warn};

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;
const BYTES_PER_MB: f64 = (1u64 << 20) as f64;

/// Usage of one tunnelled connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub owner_id: i32,
    /// Proxy pool id of the upstream used
    pub upstream_id: i32,
    /// Client to upstream
    pub bytes_up: u64,
    /// Upstream to client
    pub bytes_down: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub upstream_type: String,
    pub upstream_ip: String,
    pub upstream_country: String,
    /// CONNECT target requested by the client
    pub target_host: String,
    pub success: bool,
}

impl UsageRecord {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_up.saturating_add(self.bytes_down)
    }

    /// Milliseconds between start and end, never negative
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds().max(0)
    }

    fn to_active_model(&self) -> request_log::ActiveModel {
        request_log::ActiveModel {
            id: Set(uuid::Uuid::new_v4()),
            user_id: Set(self.owner_id),
            proxy_id: Set(self.upstream_id),
            proxy_type: Set(self.upstream_type.clone()),
            proxy_ip: Set(self.upstream_ip.clone()),
            proxy_country: Set(self.upstream_country.clone()),
            target_host: Set(self.target_host.clone()),
            bytes_up: Set(clamp_i64(self.bytes_up)),
            bytes_down: Set(clamp_i64(self.bytes_down)),
            data_used_mb: Set(self.total_bytes() as f64 / BYTES_PER_MB),
            request_duration_ms: Set(self.duration_ms()),
            status_code: Set(if self.success { 200 } else { 0 }),
            success: Set(self.success),
            timestamp: Set(self.start_time),
        }
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Per-owner usage counter
#[async_trait]
pub trait UsageAccounting: Send + Sync {
    /// Add `bytes` to the usage of `owner_id`
    async fn increment_usage(&self, owner_id: i32, bytes: u64) -> Result<(), StoreError>;
}

/// Batched storage of usage records
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Insert all records or none of them
    async fn insert_batch(&self, records: &[UsageRecord]) -> Result<(), StoreError>;

    /// Release the sink's connections
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Accounting against `subscriptions.data_used_gb`
#[derive(Clone)]
pub struct DbUsageAccounting {
    db: DatabaseConnection,
}

impl DbUsageAccounting {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageAccounting for DbUsageAccounting {
    async fn increment_usage(&self, owner_id: i32, bytes: u64) -> Result<(), StoreError> {
        let delta_gb = bytes as f64 / BYTES_PER_GB;

        let result = subscription::Entity::update_many()
            .col_expr(
                subscription::Column::DataUsedGb,
                Expr::col(subscription::Column::DataUsedGb).add(delta_gb),
            )
            .filter(subscription::Column::UserId.eq(owner_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(
                "No subscription for user {}, {} bytes not accounted",
                owner_id, bytes
            );
        } else {
            debug!("Accounted {} bytes for user {}", bytes, owner_id);
        }

        Ok(())
    }
}

/// Analytics rows in `request_logs`
#[derive(Clone)]
pub struct DbAnalyticsSink {
    db: DatabaseConnection,
}

impl DbAnalyticsSink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AnalyticsSink for DbAnalyticsSink {
    async fn insert_batch(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin().await?;
        request_log::Entity::insert_many(records.iter().map(UsageRecord::to_active_model))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        debug!("Inserted {} request log rows", records.len());
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.db.clone().close().await?;
        Ok(())
    }
}
