//! Upstream proxy entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "proxy_pools")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// residential, datacenter, mobile, isp
    pub proxy_type: String,

    pub ip_address: String,

    pub port: i32,

    pub country: Option<String>,

    pub city: Option<String>,

    pub is_active: bool,

    /// Credentials for the upstream proxy itself (empty = none)
    pub proxy_username: String,

    #[serde(skip_serializing)]
    pub proxy_password: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_allocated_proxy::Entity")]
    Allocations,
}

impl Related<super::user_allocated_proxy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
