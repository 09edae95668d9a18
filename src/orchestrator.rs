//! # Sync Orchestrator
//!
//! Drives linked items through fetch → classify → reconcile, one item at a
//! time. A failing item is recorded in the report and the pass moves on to
//! the next. Only a credential failure stops the whole pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, instrument, warn};
use utoipa::ToSchema;

use crate::aggregator::{AuthError, BankDataSource, FetchError};
use crate::classifier::classify;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::repositories::ItemRepository;

/// Errors that end a sync invocation without a report.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("aggregator authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("item {0} not found")]
    ItemNotFound(String),
    #[error("failed to enumerate items: {0}")]
    Storage(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemSyncStatus {
    /// Every fetched record was stored
    Succeeded,
    /// Fetching worked but some records were rejected
    Partial,
    /// A remote call failed; nothing after it ran for this item
    Failed,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemSyncOutcome {
    pub item_id: String,
    pub status: ItemSyncStatus,
    pub accounts_upserted: usize,
    pub transactions_upserted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    RemoteFetch,
    Reconcile,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    pub item_id: String,
    pub kind: SyncErrorKind,
    /// Record that failed to persist, for reconcile errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Upstream HTTP status, for remote fetch errors that got an answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

/// Summary of one sync invocation.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub items_processed: usize,
    pub items: Vec<ItemSyncOutcome>,
    pub errors: Vec<SyncErrorEntry>,
}

impl SyncReport {
    /// Items that did not fully succeed and are worth retrying.
    pub fn failed_item_ids(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| item.status != ItemSyncStatus::Succeeded)
            .map(|item| item.item_id.as_str())
            .collect()
    }

    /// Moves record-level failures into the report, returning how many there were.
    fn record_rejections(&mut self, run: &mut ItemRun) -> usize {
        let failures: Vec<_> = run
            .accounts
            .failures
            .drain(..)
            .chain(run.transactions.failures.drain(..))
            .collect();
        let rejected = failures.len();
        self.errors
            .extend(failures.into_iter().map(|failure| SyncErrorEntry {
                item_id: failure.item_id,
                kind: SyncErrorKind::Reconcile,
                record_id: Some(failure.record_id),
                status: None,
                message: failure.message,
            }));
        rejected
    }

    fn record_run(&mut self, item_id: &str, mut run: ItemRun) {
        let rejected = self.record_rejections(&mut run);
        self.items.push(ItemSyncOutcome {
            item_id: item_id.to_string(),
            status: if rejected == 0 {
                ItemSyncStatus::Succeeded
            } else {
                ItemSyncStatus::Partial
            },
            accounts_upserted: run.accounts.written,
            transactions_upserted: run.transactions.written,
        });
    }

    /// Records that already failed before the fetch error are reported too.
    fn record_fetch_failure(&mut self, item_id: &str, err: &FetchError, mut progress: ItemRun) {
        self.record_rejections(&mut progress);
        self.errors.push(SyncErrorEntry {
            item_id: item_id.to_string(),
            kind: SyncErrorKind::RemoteFetch,
            record_id: None,
            status: err.status(),
            message: err.to_string(),
        });
        self.items.push(ItemSyncOutcome {
            item_id: item_id.to_string(),
            status: ItemSyncStatus::Failed,
            accounts_upserted: progress.accounts.written,
            transactions_upserted: progress.transactions.written,
        });
    }
}

#[derive(Debug, Default)]
struct ItemRun {
    accounts: ReconcileOutcome,
    transactions: ReconcileOutcome,
}

pub struct SyncOrchestrator {
    source: Arc<dyn BankDataSource>,
    items: ItemRepository,
    reconciler: Reconciler,
    item_timeout: Option<Duration>,
}

impl SyncOrchestrator {
    pub fn new(source: Arc<dyn BankDataSource>, db: Arc<DatabaseConnection>) -> Self {
        Self {
            source,
            items: ItemRepository::new(db.clone()),
            reconciler: Reconciler::new(db),
            item_timeout: None,
        }
    }

    /// Caps the time spent on one item; exceeding it counts as a remote fetch failure.
    pub fn with_item_timeout(mut self, limit: Option<Duration>) -> Self {
        self.item_timeout = limit;
        self
    }

    /// Syncs every known item with transactions booked since `from`.
    #[instrument(skip_all, fields(from = %from))]
    pub async fn sync_all(&self, from: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        self.source.authenticate().await?;

        let item_ids = self.items.list_ids().await.map_err(SyncError::Storage)?;
        info!(items = item_ids.len(), "Starting sync pass");

        let report = self.run_items(&item_ids, from).await?;

        histogram!("sync_pass_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(
            items_processed = report.items_processed,
            errors = report.errors.len(),
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Syncs a single item, typically right after it was linked.
    #[instrument(skip_all, fields(item_id = %item_id, from = %from))]
    pub async fn sync_item(
        &self,
        item_id: &str,
        from: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let known = self
            .items
            .find_by_id(item_id)
            .await
            .map_err(SyncError::Storage)?;
        if known.is_none() {
            return Err(SyncError::ItemNotFound(item_id.to_string()));
        }

        self.source.authenticate().await?;
        self.run_items(&[item_id.to_string()], from).await
    }

    async fn run_items(
        &self,
        item_ids: &[String],
        from: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        for item_id in item_ids {
            report.items_processed += 1;
            let mut progress = ItemRun::default();

            let span = info_span!("sync_item", item_id = %item_id);
            let result = match self.item_timeout {
                Some(limit) => tokio::time::timeout(
                    limit,
                    self.run_item(item_id, from, &mut progress).instrument(span),
                )
                .await
                .unwrap_or_else(|_| Err(FetchError::timed_out(limit))),
                None => {
                    self.run_item(item_id, from, &mut progress)
                        .instrument(span)
                        .await
                }
            };

            match result {
                Ok(()) => {
                    counter!("sync_transactions_upserted_total")
                        .increment(progress.transactions.written as u64);
                    let outcome = if progress.accounts.failures.is_empty()
                        && progress.transactions.failures.is_empty()
                    {
                        "succeeded"
                    } else {
                        "partial"
                    };
                    counter!("sync_items_total", "outcome" => outcome).increment(1);
                    report.record_run(item_id, progress);
                }
                Err(FetchError::Auth(err)) => {
                    counter!("sync_items_total", "outcome" => "auth_failed").increment(1);
                    error!(item_id = %item_id, error = %err, "Aggregator authentication failed; aborting pass");
                    return Err(SyncError::Auth(err));
                }
                Err(err) => {
                    counter!("sync_items_total", "outcome" => "failed").increment(1);
                    warn!(item_id = %item_id, error = %err, "Item sync failed; continuing with next item");
                    report.record_fetch_failure(item_id, &err, progress);
                }
            }
        }

        Ok(report)
    }

    /// Accounts first, then transactions, so every stored transaction has its account.
    async fn run_item(
        &self,
        item_id: &str,
        from: DateTime<Utc>,
        progress: &mut ItemRun,
    ) -> Result<(), FetchError> {
        let accounts = self.source.fetch_accounts(item_id).await?;
        self.reconciler
            .upsert_accounts_into(item_id, &accounts, Utc::now(), &mut progress.accounts)
            .await;

        let raw = self.source.fetch_transactions(item_id, from).await?;
        let classified: Vec<_> = raw.iter().map(classify).collect();
        self.reconciler
            .upsert_transactions_into(item_id, &classified, &mut progress.transactions)
            .await;

        info!(
            accounts = progress.accounts.written,
            transactions = progress.transactions.written,
            rejected = progress.accounts.failures.len() + progress.transactions.failures.len(),
            "Item synced"
        );
        Ok(())
    }
}
