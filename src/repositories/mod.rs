//! # Repositories
//!
//! SeaORM-backed data access for items, accounts and transactions.

pub mod account;
pub mod item;
pub mod transaction;

pub use account::AccountRepository;
pub use item::ItemRepository;
pub use transaction::{DateWindow, MonthlyTotal, TransactionRepository};
