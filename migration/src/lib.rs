//! Database migrations for the Open Finance sync service.
//!
//! Tables are created leaf-first: items, then accounts, then transactions.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_090000_create_items;
mod m2025_01_10_090100_create_accounts;
mod m2025_01_10_090200_create_transactions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_090000_create_items::Migration),
            Box::new(m2025_01_10_090100_create_accounts::Migration),
            Box::new(m2025_01_10_090200_create_transactions::Migration),
        ]
    }
}
