//! # Open Finance Sync Library
//!
//! Links Open Finance items through the aggregator and keeps their accounts
//! and transactions mirrored locally, classified as income or expense.

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod reconciler;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub use migration;
