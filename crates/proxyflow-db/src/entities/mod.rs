//! Database entities
//!
//! `users`, `proxy_pools`, `user_allocated_proxies` and `subscriptions`
//! live in the relational store; `request_logs` lives in the analytics
//! store.

pub mod proxy_pool;
pub mod request_log;
pub mod subscription;
pub mod user;
pub mod user_allocated_proxy;

pub use proxy_pool::Entity as ProxyPool;
pub use request_log::Entity as RequestLog;
pub use subscription::Entity as Subscription;
pub use user::Entity as User;
pub use user_allocated_proxy::Entity as UserAllocatedProxy;

pub mod prelude {
    pub use super::proxy_pool::Entity as ProxyPool;
    pub use super::request_log::Entity as RequestLog;
    pub use super::subscription::Entity as Subscription;
    pub use super::user::Entity as User;
    pub use super::user_allocated_proxy::Entity as UserAllocatedProxy;
}
