//! # Data Models
//!
//! SeaORM entities for linked items, their accounts and synced transactions,
//! plus small response models shared by handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod account;
pub mod item;
pub mod transaction;

pub use account::Entity as Account;
pub use item::Entity as Item;
pub use transaction::{Entity as Transaction, Flow};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "openfinance-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
