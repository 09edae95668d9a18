//! # Reconciler
//!
//! Merges fetched accounts and classified transactions into storage. Each
//! record is one independent insert-or-update keyed by its remote id, so a
//! failing row never rolls back rows already written and replaying the same
//! input leaves storage unchanged.
//!
//! Transactions are only written for accounts already stored under the same
//! item. Anything else is rejected with a [`ReconcileError`]; callers must
//! upsert an item's accounts before its transactions. An account stays with
//! the item that first reported it; another item reporting the same id gets a
//! [`ReconcileError`] for that account.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, Set};
use thiserror::Error;
use tracing::{debug, warn};

use crate::aggregator::RawAccount;
use crate::classifier::{ClassifiedTransaction, DEFAULT_CURRENCY};
use crate::models::{account, transaction};
use crate::repositories::{AccountRepository, ItemRepository, TransactionRepository};

/// A single record that could not be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {record_id} of item {item_id} not stored: {message}")]
pub struct ReconcileError {
    pub item_id: String,
    pub record_id: String,
    pub message: String,
}

/// Result of reconciling one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub written: usize,
    pub failures: Vec<ReconcileError>,
}

impl ReconcileOutcome {
    fn fail(&mut self, item_id: &str, record_id: &str, message: impl Into<String>) {
        self.failures.push(ReconcileError {
            item_id: item_id.to_string(),
            record_id: record_id.to_string(),
            message: message.into(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    items: ItemRepository,
    accounts: AccountRepository,
    transactions: TransactionRepository,
}

impl Reconciler {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            items: ItemRepository::new(db.clone()),
            accounts: AccountRepository::new(db.clone()),
            transactions: TransactionRepository::new(db),
        }
    }

    /// Upserts the item's accounts, stamping each with `synced_at`.
    pub async fn upsert_accounts(
        &self,
        item_id: &str,
        accounts: &[RawAccount],
        synced_at: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.upsert_accounts_into(item_id, accounts, synced_at, &mut outcome)
            .await;
        outcome
    }

    /// Same as [`Reconciler::upsert_accounts`], recording each row in `outcome`
    /// as soon as it is written. Rows stored before the future is dropped stay
    /// counted.
    pub async fn upsert_accounts_into(
        &self,
        item_id: &str,
        accounts: &[RawAccount],
        synced_at: DateTime<Utc>,
        outcome: &mut ReconcileOutcome,
    ) {
        let item_known = match self.items.find_by_id(item_id).await {
            Ok(item) => item.is_some(),
            Err(err) => {
                warn!(item_id, error = %err, "Could not look up item before account upsert");
                for raw in accounts {
                    outcome.fail(item_id, &raw.id, format!("item lookup failed: {err}"));
                }
                return;
            }
        };
        if !item_known {
            for raw in accounts {
                outcome.fail(item_id, &raw.id, "item not found");
            }
            return;
        }

        let ids: Vec<String> = accounts.iter().map(|raw| raw.id.clone()).collect();
        let owners = match self.accounts.owners(&ids).await {
            Ok(owners) => owners,
            Err(err) => {
                warn!(item_id, error = %err, "Could not look up account owners");
                for raw in accounts {
                    outcome.fail(item_id, &raw.id, format!("account lookup failed: {err}"));
                }
                return;
            }
        };

        for raw in accounts {
            if let Some(owner) = owners.get(&raw.id)
                && owner != item_id
            {
                warn!(item_id, account_id = %raw.id, owner = %owner, "Account belongs to another item");
                outcome.fail(
                    item_id,
                    &raw.id,
                    format!("account already linked to item {owner}"),
                );
                continue;
            }

            let active = account::ActiveModel {
                id: Set(raw.id.clone()),
                item_id: Set(item_id.to_string()),
                name: Set(raw.name.clone()),
                account_type: Set(raw.account_type.clone()),
                currency: Set(raw
                    .currency
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())),
                balance: Set(raw.balance.unwrap_or(Decimal::ZERO)),
                updated_at: Set(synced_at.fixed_offset()),
            };

            match self.accounts.upsert(active).await {
                Ok(()) => outcome.written += 1,
                Err(err) => {
                    warn!(item_id, account_id = %raw.id, error = %err, "Account upsert failed");
                    outcome.fail(item_id, &raw.id, err.to_string());
                }
            }
        }

        debug!(
            item_id,
            written = outcome.written,
            failed = outcome.failures.len(),
            "Accounts reconciled"
        );
    }

    /// Upserts classified transactions whose account belongs to `item_id`.
    pub async fn upsert_transactions(
        &self,
        item_id: &str,
        transactions: &[ClassifiedTransaction],
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.upsert_transactions_into(item_id, transactions, &mut outcome)
            .await;
        outcome
    }

    /// Same as [`Reconciler::upsert_transactions`], recording progress in
    /// `outcome` row by row.
    pub async fn upsert_transactions_into(
        &self,
        item_id: &str,
        transactions: &[ClassifiedTransaction],
        outcome: &mut ReconcileOutcome,
    ) {
        let known_accounts: HashSet<String> = match self.accounts.ids_for_item(item_id).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(item_id, error = %err, "Could not load accounts before transaction upsert");
                for tx in transactions {
                    outcome.fail(item_id, &tx.id, format!("account lookup failed: {err}"));
                }
                return;
            }
        };

        let inserted_at = Utc::now().fixed_offset();

        for tx in transactions {
            if !known_accounts.contains(&tx.account_id) {
                outcome.fail(
                    item_id,
                    &tx.id,
                    format!("account {} not found for item", tx.account_id),
                );
                continue;
            }

            let active = transaction::ActiveModel {
                id: Set(tx.id.clone()),
                account_id: Set(tx.account_id.clone()),
                description: Set(tx.description.clone()),
                date: Set(tx.date.fixed_offset()),
                amount: Set(tx.amount),
                flow: Set(tx.flow),
                category: Set(tx.category.clone()),
                currency: Set(tx.currency.clone()),
                inserted_at: Set(inserted_at),
            };

            match self.transactions.upsert(active).await {
                Ok(()) => outcome.written += 1,
                Err(err) => {
                    warn!(item_id, transaction_id = %tx.id, error = %err, "Transaction upsert failed");
                    outcome.fail(item_id, &tx.id, err.to_string());
                }
            }
        }

        if !outcome.failures.is_empty() {
            warn!(
                item_id,
                written = outcome.written,
                failed = outcome.failures.len(),
                "Some transactions were not stored"
            );
        }
    }
}
