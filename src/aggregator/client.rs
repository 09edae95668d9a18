//! # Remote Fetcher
//!
//! HTTP client for the aggregator's data endpoints. Every request carries the
//! cached API key in `X-API-KEY`. A 401 answer invalidates that key and the
//! request is retried once with a fresh one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::credentials::CredentialCache;
use super::error::{AuthError, FetchError, snippet};
use super::types::{ConnectTokenResponse, Page, RawAccount, RawTransaction};
use super::BankDataSource;
use crate::config::AggregatorConfig;

const API_KEY_HEADER: &str = "X-API-KEY";

/// Hard stop for a transaction listing that never signals its last page.
const MAX_TRANSACTION_PAGES: u32 = 1_000;

pub struct AggregatorClient {
    http: reqwest::Client,
    api_base: String,
    page_size: u32,
    credentials: Arc<CredentialCache>,
}

impl AggregatorClient {
    pub fn new(
        http: reqwest::Client,
        config: &AggregatorConfig,
        credentials: Arc<CredentialCache>,
    ) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            page_size: config.page_size.max(1),
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Issues a short-lived token for the embeddable linking widget.
    #[instrument(skip_all)]
    pub async fn create_connect_token(&self) -> Result<String, FetchError> {
        let url = self.url("/connect_token");
        let response: ConnectTokenResponse = self
            .send_authorized(|key| {
                self.http
                    .post(&url)
                    .header(API_KEY_HEADER, key)
                    .json(&serde_json::json!({}))
            })
            .await?;
        Ok(response.access_token)
    }

    /// Lists the accounts of an item. The endpoint is not paginated.
    #[instrument(skip(self))]
    pub async fn fetch_accounts(&self, item_id: &str) -> Result<Vec<RawAccount>, FetchError> {
        let url = self.url("/accounts");
        let page: Page<RawAccount> = self
            .send_authorized(|key| {
                self.http
                    .get(&url)
                    .header(API_KEY_HEADER, key)
                    .query(&[("itemId", item_id)])
            })
            .await?;

        debug!(accounts = page.results.len(), "Fetched accounts");
        Ok(page.results)
    }

    /// Walks every page of the item's transactions booked since `since`.
    ///
    /// Stops at the first page shorter than the page size, or once the
    /// reported total (or page count) is reached, whichever comes first.
    #[instrument(skip(self))]
    pub async fn fetch_transactions(
        &self,
        item_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawTransaction>, FetchError> {
        let url = self.url("/transactions");
        let from = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let page_size = self.page_size.to_string();

        let mut transactions = Vec::new();
        let mut page: u32 = 1;

        loop {
            let page_number = page.to_string();
            let envelope: Page<RawTransaction> = self
                .send_authorized(|key| {
                    self.http.get(&url).header(API_KEY_HEADER, key).query(&[
                        ("itemId", item_id),
                        ("from", from.as_str()),
                        ("page", page_number.as_str()),
                        ("pageSize", page_size.as_str()),
                    ])
                })
                .await?;

            let received = envelope.results.len();
            transactions.extend(envelope.results);

            debug!(
                page,
                received,
                accumulated = transactions.len(),
                total = ?envelope.total,
                "Fetched transaction page"
            );

            if is_last_page(
                self.page_size,
                page,
                received,
                transactions.len(),
                envelope.total,
                envelope.total_pages,
            ) {
                break;
            }

            if page >= MAX_TRANSACTION_PAGES {
                warn!(page, "Transaction listing exceeded page limit; stopping");
                break;
            }
            page += 1;
        }

        Ok(transactions)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Sends the request built by `build` with the current key, refreshing the
    /// key and retrying exactly once when the aggregator answers 401.
    async fn send_authorized<T, F>(&self, build: F) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> RequestBuilder,
    {
        let key = self.credentials.api_key().await?;
        let response = build(&key)
            .send()
            .await
            .map_err(FetchError::from_transport)?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Aggregator rejected API key; refreshing and retrying once");
            counter!("aggregator_unauthorized_retries_total").increment(1);
            self.credentials.invalidate(&key).await;
            let key = self.credentials.api_key().await?;
            build(&key)
                .send()
                .await
                .map_err(FetchError::from_transport)?
        } else {
            response
        };

        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        counter!("aggregator_request_failures_total", "status" => status.as_u16().to_string())
            .increment(1);
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Status {
            status: status.as_u16(),
            body: snippet(body),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(FetchError::from_transport)?;
    serde_json::from_slice(&bytes).map_err(|err| FetchError::Malformed {
        details: err.to_string(),
    })
}

fn is_last_page(
    page_size: u32,
    page: u32,
    received: usize,
    accumulated: usize,
    total: Option<u64>,
    total_pages: Option<u32>,
) -> bool {
    if received < page_size as usize {
        return true;
    }
    if let Some(total) = total
        && (accumulated as u64 >= total || u64::from(page) >= total.div_ceil(u64::from(page_size)))
    {
        return true;
    }
    total_pages.is_some_and(|pages| page >= pages)
}

#[async_trait]
impl BankDataSource for AggregatorClient {
    async fn authenticate(&self) -> Result<(), AuthError> {
        self.credentials.api_key().await.map(|_| ())
    }

    async fn fetch_accounts(&self, item_id: &str) -> Result<Vec<RawAccount>, FetchError> {
        AggregatorClient::fetch_accounts(self, item_id).await
    }

    async fn fetch_transactions(
        &self,
        item_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawTransaction>, FetchError> {
        AggregatorClient::fetch_transactions(self, item_id, since).await
    }
}
