//! Account entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub email: String,

    /// Account name used in the gateway credentials
    #[sea_orm(unique)]
    pub username: String,

    /// API key used as the gateway password
    #[sea_orm(unique)]
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Deactivated accounts never resolve to an allocation
    pub is_active: bool,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// User owns allocated gateway ports
    #[sea_orm(has_many = "super::user_allocated_proxy::Entity")]
    AllocatedProxies,

    /// User has one subscription carrying the data quota
    #[sea_orm(has_one = "super::subscription::Entity")]
    Subscription,
}

impl Related<super::user_allocated_proxy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AllocatedProxies.def()
    }
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
