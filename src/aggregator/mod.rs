//! # Aggregator Integration
//!
//! Client side of the Pluggy Open Finance API: the cached API key, the
//! paginated account/transaction fetcher and the raw wire types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod client;
pub mod credentials;
pub mod error;
pub mod types;

pub use client::AggregatorClient;
pub use credentials::{Clock, CredentialCache, SystemClock};
pub use error::{AuthError, FetchError};
pub use types::{RawAccount, RawCategory, RawTransaction};

use crate::config::AggregatorConfig;

/// Source of remote bank data for the sync pipeline.
#[async_trait]
pub trait BankDataSource: Send + Sync {
    /// Ensures a usable credential exists before any item is processed.
    async fn authenticate(&self) -> Result<(), AuthError>;

    /// Returns every account the aggregator reports for the item.
    async fn fetch_accounts(&self, item_id: &str) -> Result<Vec<RawAccount>, FetchError>;

    /// Returns all transactions booked since `since`, across every page.
    async fn fetch_transactions(
        &self,
        item_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawTransaction>, FetchError>;
}

/// Builds the HTTP client shared by the credential cache and the fetcher.
pub fn build_http_client(config: &AggregatorConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(concat!("openfinance-sync/", env!("CARGO_PKG_VERSION")))
        .build()
}
