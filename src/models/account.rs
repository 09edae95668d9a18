//! Account entity model
//!
//! Bank accounts reported by the aggregator for a linked item. Balances and
//! metadata are overwritten on every sync.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Account entity keyed by the aggregator's account id
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Aggregator-assigned account identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owning item
    pub item_id: String,

    pub name: String,

    /// Account kind as reported by the aggregator (e.g. BANK, CREDIT)
    #[sea_orm(column_name = "type")]
    pub account_type: String,

    /// ISO 4217 currency code
    pub currency: String,

    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub balance: Decimal,

    /// Time of the last sync that touched this account
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemId",
        to = "super::item::Column::Id"
    )]
    Item,
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transaction,
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transaction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
