//! Database migrations for the runsync service.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_090000_create_user_integrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(
            m2026_01_10_090000_create_user_integrations::Migration,
        )]
    }
}
