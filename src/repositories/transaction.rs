//! Transaction repository for database operations
//!
//! Besides the keyed upsert used by the sync pipeline, this provides the
//! read side: date-filtered paging and the monthly income/expense summary.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::models::Flow;
use crate::models::transaction::{self, Entity as Transaction};

/// Optional half-open date window `[from, to)`.
#[derive(Debug, Clone, Default)]
pub struct DateWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Total moved in one direction during one calendar month (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MonthlyTotal {
    /// Month as `YYYY-MM`
    pub ym: String,
    pub flow: Flow,
    /// Sum of absolute amounts
    #[schema(value_type = String)]
    pub total: Decimal,
}

/// Repository for transaction database operations
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pub db: Arc<DatabaseConnection>,
}

impl TransactionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts the transaction or overwrites its mutable fields. `account_id`
    /// and `inserted_at` keep their first-insert values.
    pub async fn upsert(&self, transaction: transaction::ActiveModel) -> Result<()> {
        Transaction::insert(transaction)
            .on_conflict(
                OnConflict::column(transaction::Column::Id)
                    .update_columns([
                        transaction::Column::Description,
                        transaction::Column::Date,
                        transaction::Column::Amount,
                        transaction::Column::Flow,
                        transaction::Column::Category,
                        transaction::Column::Currency,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, transaction_id: &str) -> Result<Option<transaction::Model>> {
        Ok(Transaction::find_by_id(transaction_id.to_string())
            .one(&*self.db)
            .await?)
    }

    /// One page (1-based) of transactions inside `window`, newest first,
    /// along with the number of matching rows.
    pub async fn list_page(
        &self,
        window: &DateWindow,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<transaction::Model>, u64)> {
        let mut query = Transaction::find();
        if let Some(from) = window.from {
            query = query.filter(transaction::Column::Date.gte(from.fixed_offset()));
        }
        if let Some(to) = window.to {
            query = query.filter(transaction::Column::Date.lt(to.fixed_offset()));
        }

        let paginator = query
            .order_by_desc(transaction::Column::Date)
            .order_by_desc(transaction::Column::Id)
            .paginate(&*self.db, page_size.max(1));

        let total = paginator.num_items().await?;
        let page_index = page.saturating_sub(1);
        // Pages past the end, including ones whose offset overflows, are empty
        let rows = match page_index.checked_mul(page_size.max(1)) {
            Some(offset) if offset < total => paginator.fetch_page(page_index).await?,
            _ => Vec::new(),
        };
        Ok((rows, total))
    }

    /// Per-month, per-flow totals of absolute amounts, newest month first.
    pub async fn monthly_summary(&self) -> Result<Vec<MonthlyTotal>> {
        let rows = Transaction::find().all(&*self.db).await?;

        let mut totals: BTreeMap<(String, &'static str), (Flow, Decimal)> = BTreeMap::new();
        for row in rows {
            let ym = row.date.with_timezone(&Utc).format("%Y-%m").to_string();
            let entry = totals
                .entry((ym, row.flow.as_str()))
                .or_insert((row.flow, Decimal::ZERO));
            entry.1 += row.amount.abs();
        }

        let mut summary: Vec<MonthlyTotal> = totals
            .into_iter()
            .map(|((ym, _), (flow, total))| MonthlyTotal { ym, flow, total })
            .collect();
        // Month descending, flow name ascending within a month
        summary.sort_by(|a, b| b.ym.cmp(&a.ym).then(a.flow.as_str().cmp(b.flow.as_str())));
        Ok(summary)
    }
}
