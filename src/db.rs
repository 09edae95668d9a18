//! Storage bootstrap for the sync service.
//!
//! Postgres backs deployments; SQLite serves local runs and the test suite.
//! Both go through the same bounded SeaORM pool.

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("OPENFINANCE_DATABASE_URL is empty")]
    MissingUrl,
    #[error("database unreachable after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        #[source]
        source: DbErr,
    },
}

/// Opens the pool described by `OPENFINANCE_DATABASE_URL`.
///
/// The database may still be starting next to the service, so failed
/// connects are retried with a doubling backoff before giving up.
///
/// ```no_run
/// use openfinance_sync::{config::AppConfig, db::init_pool};
///
/// # async fn open() -> anyhow::Result<()> {
/// let db = init_pool(&AppConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::MissingUrl.into());
    }

    let mut options = ConnectOptions::new(&cfg.database_url);
    options
        .max_connections(pool_size(cfg))
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut backoff = FIRST_BACKOFF;
    let mut attempt = 1;
    loop {
        match Database::connect(options.clone()).await {
            Ok(conn) => {
                log::info!(
                    "Connected to {:?} database (attempt {attempt})",
                    conn.get_database_backend()
                );
                return Ok(conn);
            }
            Err(source) if attempt >= CONNECT_ATTEMPTS => {
                log::error!("Giving up on database after {attempt} attempts: {source}");
                return Err(DatabaseError::Unreachable {
                    attempts: attempt,
                    source,
                }
                .into());
            }
            Err(err) => {
                log::warn!("Database connect attempt {attempt} failed: {err}; retrying in {backoff:?}");
                sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}

/// Every connection to an in-memory SQLite URL opens its own empty database.
fn pool_size(cfg: &AppConfig) -> u32 {
    if cfg.database_url.contains(":memory:") {
        1
    } else {
        cfg.db_max_connections
    }
}

/// Creates or updates the `items`, `accounts` and `transactions` tables.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("Failed to apply database migrations")?;
    log::info!("Database migrations applied");
    Ok(())
}

/// Round-trips `SELECT 1`; backs the readiness probe.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1");
    db.query_one(stmt)
        .await
        .context("Database health check failed")?;
    Ok(())
}
