//! Allocation lookup
//!
//! Resolves `(username, api_key, virtual_port)` to the upstream proxy the
//! account was allocated under that virtual port. Resolution is done fresh
//! for every connection; nothing is cached.

use crate::entities::{proxy_pool, user, user_allocated_proxy};
use crate::StoreError;
use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter, QuerySelect,
    RelationTrait,
};
use sea_orm::JoinType;
use std::fmt;
use tracing::debug;

/// Upstream endpoint and owner identity for one authenticated connection
#[derive(Clone, PartialEq, Eq)]
pub struct Allocation {
    pub owner_id: i32,
    pub username: String,
    pub api_key: String,
    pub virtual_port: u32,
    /// Proxy pool id of the upstream
    pub upstream_id: i32,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub upstream_type: String,
    pub upstream_country: String,
    pub upstream_username: Option<String>,
    pub upstream_password: Option<String>,
}

impl Allocation {
    /// `host:port` of the upstream proxy
    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }

    /// Credentials the upstream proxy expects, if any
    pub fn upstream_credentials(&self) -> Option<(&str, &str)> {
        match (&self.upstream_username, &self.upstream_password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            (Some(user), None) => Some((user.as_str(), "")),
            _ => None,
        }
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("owner_id", &self.owner_id)
            .field("username", &self.username)
            .field("virtual_port", &self.virtual_port)
            .field("upstream_id", &self.upstream_id)
            .field("upstream_host", &self.upstream_host)
            .field("upstream_port", &self.upstream_port)
            .field("upstream_type", &self.upstream_type)
            .field("upstream_country", &self.upstream_country)
            .field("upstream_username", &self.upstream_username)
            .finish_non_exhaustive()
    }
}

/// Resolves gateway credentials to an [`Allocation`]
///
/// Implementations must only return allocations of active accounts and
/// must match username, API key and virtual port together.
///
/// # Returns
///
/// * `Ok(Some(allocation))` - credentials are valid
/// * `Ok(None)` - no active account/allocation matches
/// * `Err(StoreError)` - the backing store could not answer
#[async_trait]
pub trait AllocationResolver: Send + Sync {
    async fn resolve(
        &self,
        username: &str,
        api_key: &str,
        virtual_port: u32,
    ) -> Result<Option<Allocation>, StoreError>;
}

#[derive(Debug, FromQueryResult)]
struct AllocationRow {
    owner_id: i32,
    username: String,
    api_key: String,
    gateway_port: i32,
    upstream_id: i32,
    upstream_host: String,
    upstream_port: i32,
    upstream_type: String,
    upstream_country: Option<String>,
    upstream_username: String,
    upstream_password: String,
}

impl AllocationRow {
    fn into_allocation(self) -> Option<Allocation> {
        let upstream_port = match u16::try_from(self.upstream_port) {
            Ok(port) => port,
            Err(_) => {
                debug!(
                    "Proxy pool {} has out-of-range port {}",
                    self.upstream_id, self.upstream_port
                );
                return None;
            }
        };

        Some(Allocation {
            owner_id: self.owner_id,
            username: self.username,
            api_key: self.api_key,
            virtual_port: self.gateway_port as u32,
            upstream_id: self.upstream_id,
            upstream_host: self.upstream_host,
            upstream_port,
            upstream_type: self.upstream_type,
            upstream_country: self.upstream_country.unwrap_or_default(),
            upstream_username: non_empty(self.upstream_username),
            upstream_password: non_empty(self.upstream_password),
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// SeaORM-backed resolver over `user_allocated_proxies ⨝ users ⨝ proxy_pools`
#[derive(Clone)]
pub struct DbAllocationResolver {
    db: DatabaseConnection,
}

impl DbAllocationResolver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AllocationResolver for DbAllocationResolver {
    async fn resolve(
        &self,
        username: &str,
        api_key: &str,
        virtual_port: u32,
    ) -> Result<Option<Allocation>, StoreError> {
        // A port outside the column range cannot match any row
        let Ok(gateway_port) = i32::try_from(virtual_port) else {
            return Ok(None);
        };

        let row = user_allocated_proxy::Entity::find()
            .select_only()
            .column_as(user::Column::Id, "owner_id")
            .column_as(user::Column::Username, "username")
            .column_as(user::Column::ApiKey, "api_key")
            .column_as(user_allocated_proxy::Column::GatewayPort, "gateway_port")
            .column_as(proxy_pool::Column::Id, "upstream_id")
            .column_as(proxy_pool::Column::IpAddress, "upstream_host")
            .column_as(proxy_pool::Column::Port, "upstream_port")
            .column_as(proxy_pool::Column::ProxyType, "upstream_type")
            .column_as(proxy_pool::Column::Country, "upstream_country")
            .column_as(proxy_pool::Column::ProxyUsername, "upstream_username")
            .column_as(proxy_pool::Column::ProxyPassword, "upstream_password")
            .join(JoinType::InnerJoin, user_allocated_proxy::Relation::User.def())
            .join(
                JoinType::InnerJoin,
                user_allocated_proxy::Relation::ProxyPool.def(),
            )
            .filter(user::Column::Username.eq(username))
            .filter(user::Column::ApiKey.eq(api_key))
            .filter(user_allocated_proxy::Column::GatewayPort.eq(gateway_port))
            .filter(user::Column::IsActive.eq(true))
            .limit(1)
            .into_model::<AllocationRow>()
            .one(&self.db)
            .await?;

        Ok(row.and_then(AllocationRow::into_allocation))
    }
}
