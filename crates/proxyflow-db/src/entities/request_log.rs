//! Per-connection analytics row

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "request_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: i32,

    pub proxy_id: i32,

    pub proxy_type: String,

    pub proxy_ip: String,

    pub proxy_country: String,

    /// CONNECT target requested by the client (`host:port`)
    pub target_host: String,

    pub bytes_up: i64,

    pub bytes_down: i64,

    pub data_used_mb: f64,

    pub request_duration_ms: i64,

    pub status_code: i32,

    pub success: bool,

    /// Connection start time
    pub timestamp: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
