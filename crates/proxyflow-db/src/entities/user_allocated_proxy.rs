//! Allocation of an upstream proxy to a user under a virtual (gateway) port

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_allocated_proxies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: i32,

    pub proxy_pool_id: i32,

    /// Virtual port the user puts in their credentials (`username_<port>`)
    pub gateway_port: i32,

    pub allocated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    User,

    #[sea_orm(
        belongs_to = "super::proxy_pool::Entity",
        from = "Column::ProxyPoolId",
        to = "super::proxy_pool::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    ProxyPool,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::proxy_pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProxyPool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
