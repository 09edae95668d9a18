//! Account repository for database operations

use anyhow::Result;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::account::{self, Entity as Account};
use crate::models::item::{self, Entity as Item};

/// Repository for account database operations
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pub db: Arc<DatabaseConnection>,
}

impl AccountRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts the account or overwrites its mutable fields. `item_id` is
    /// fixed at first insert.
    pub async fn upsert(&self, account: account::ActiveModel) -> Result<()> {
        Account::insert(account)
            .on_conflict(
                OnConflict::column(account::Column::Id)
                    .update_columns([
                        account::Column::Name,
                        account::Column::AccountType,
                        account::Column::Currency,
                        account::Column::Balance,
                        account::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, account_id: &str) -> Result<Option<account::Model>> {
        Ok(Account::find_by_id(account_id.to_string())
            .one(&*self.db)
            .await?)
    }

    /// Ids of the accounts stored for an item.
    pub async fn ids_for_item(&self, item_id: &str) -> Result<HashSet<String>> {
        let ids = Account::find()
            .select_only()
            .column(account::Column::Id)
            .filter(account::Column::ItemId.eq(item_id))
            .into_tuple::<String>()
            .all(&*self.db)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Owning item of each of `account_ids` that is already stored.
    pub async fn owners(&self, account_ids: &[String]) -> Result<HashMap<String, String>> {
        if account_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = Account::find()
            .select_only()
            .column(account::Column::Id)
            .column(account::Column::ItemId)
            .filter(account::Column::Id.is_in(account_ids.iter().cloned()))
            .into_tuple::<(String, String)>()
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().collect())
    }

    /// All accounts with their owning item, most recently synced first.
    pub async fn list_with_item(&self) -> Result<Vec<(account::Model, Option<item::Model>)>> {
        let rows = Account::find()
            .find_also_related(Item)
            .order_by_desc(account::Column::UpdatedAt)
            .order_by_asc(account::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }
}
