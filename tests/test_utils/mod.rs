//! Test utilities for database testing.
//!
//! In-memory SQLite databases with migrations applied, plus fixture inserters
//! and a canned configuration pointing the aggregator at a mock server.

use anyhow::Result;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use openfinance_sync::config::{AggregatorConfig, AppConfig};
use openfinance_sync::models::{account, item};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Set, Statement};
use std::sync::Arc;

/// Sets up an in-memory SQLite database with all migrations applied and
/// foreign keys enforced.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;

    Ok(db)
}

#[allow(dead_code)]
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Inserts an item row directly.
#[allow(dead_code)]
pub async fn insert_item(
    db: &DatabaseConnection,
    item_id: &str,
    provider: Option<&str>,
) -> Result<item::Model> {
    let model = item::ActiveModel {
        id: Set(item_id.to_string()),
        provider: Set(provider.map(str::to_string)),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await?;
    Ok(model)
}

/// Inserts an account row directly under `item_id`.
#[allow(dead_code)]
pub async fn insert_account(
    db: &DatabaseConnection,
    item_id: &str,
    account_id: &str,
) -> Result<account::Model> {
    let model = account::ActiveModel {
        id: Set(account_id.to_string()),
        item_id: Set(item_id.to_string()),
        name: Set(format!("Account {account_id}")),
        account_type: Set("BANK".to_string()),
        currency: Set("BRL".to_string()),
        balance: Set(Decimal::ZERO),
        updated_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await?;
    Ok(model)
}

/// Local-profile config whose aggregator lives at `api_base`.
#[allow(dead_code)]
pub fn test_config(api_base: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        aggregator: AggregatorConfig {
            client_id: Some("test-client".to_string()),
            client_secret: Some("test-secret".to_string()),
            api_base: api_base.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}
