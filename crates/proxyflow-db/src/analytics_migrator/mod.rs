//! Analytics store migrations
//!
//! Kept separate from [`crate::migrator`] because the analytics table
//! lives in its own database.

use sea_orm_migration::prelude::*;

mod m20250201_000002_create_request_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20250201_000002_create_request_logs::Migration)]
    }
}
