//! Item repository for database operations
//!
//! Items are created by the linking flow and only ever gain a provider label
//! afterwards.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;

use crate::models::item::{self, Entity as Item};

/// Repository for item database operations
#[derive(Debug, Clone)]
pub struct ItemRepository {
    pub db: Arc<DatabaseConnection>,
}

impl ItemRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Records a linked item, keeping an existing row and its `created_at`.
    ///
    /// A non-empty `provider` overwrites the stored label; `None` leaves it untouched.
    pub async fn upsert(&self, item_id: &str, provider: Option<&str>) -> Result<item::Model> {
        let provider = provider.map(str::trim).filter(|p| !p.is_empty());

        let active = item::ActiveModel {
            id: Set(item_id.to_string()),
            provider: Set(provider.map(str::to_string)),
            created_at: Set(Utc::now().fixed_offset()),
        };

        Item::insert(active)
            .on_conflict(OnConflict::column(item::Column::Id).do_nothing().to_owned())
            .exec_without_returning(&*self.db)
            .await?;

        if let Some(provider) = provider {
            Item::update_many()
                .col_expr(item::Column::Provider, Expr::value(provider.to_string()))
                .filter(item::Column::Id.eq(item_id))
                .exec(&*self.db)
                .await?;
        }

        self.find_by_id(item_id)
            .await?
            .ok_or_else(|| anyhow!("item '{}' not persisted", item_id))
    }

    pub async fn find_by_id(&self, item_id: &str) -> Result<Option<item::Model>> {
        Ok(Item::find_by_id(item_id.to_string()).one(&*self.db).await?)
    }

    /// All items, most recently linked first.
    pub async fn list_all(&self) -> Result<Vec<item::Model>> {
        let items = Item::find()
            .order_by_desc(item::Column::CreatedAt)
            .order_by_asc(item::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Item ids in the order a sync pass visits them (oldest link first).
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let ids = Item::find()
            .select_only()
            .column(item::Column::Id)
            .order_by_asc(item::Column::CreatedAt)
            .order_by_asc(item::Column::Id)
            .into_tuple::<String>()
            .all(&*self.db)
            .await?;
        Ok(ids)
    }
}
