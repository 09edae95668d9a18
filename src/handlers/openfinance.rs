//! # Open Finance API Handlers
//!
//! Routes used by the front end: widget connect tokens, item linking, sync
//! triggers and the read side over synced accounts and transactions.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::config::parse_timestamp;
use crate::error::{ApiError, validation_error};
use crate::models::{Flow, account, item, transaction};
use crate::orchestrator::SyncReport;
use crate::repositories::{
    AccountRepository, DateWindow, ItemRepository, MonthlyTotal, TransactionRepository,
};
use crate::server::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTokenResponse {
    /// Short-lived token for the aggregator's linking widget
    pub access_token: String,
}

/// Body sent by the front end once the linking widget completes
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveItemRequest {
    pub item_id: Option<String>,
    /// Institution display name, e.g. "Nubank"
    pub provider: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveItemResponse {
    pub ok: bool,
    pub item_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: String,
    pub provider: Option<String>,
    pub created_at: String,
}

impl From<item::Model> for ItemView {
    fn from(model: item::Model) -> Self {
        Self {
            id: model.id,
            provider: model.provider,
            created_at: to_utc_string(model.created_at),
        }
    }
}

/// Optional body of the sync endpoints
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct SyncRequest {
    /// Lower bound for transaction dates (RFC 3339 or YYYY-MM-DD)
    pub from: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub item_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: String,
    pub currency: String,
    #[schema(value_type = String, example = "1520.35")]
    pub balance: Decimal,
    pub updated_at: String,
    /// Provider of the owning item
    pub provider: Option<String>,
}

impl AccountView {
    fn new(model: account::Model, item: Option<item::Model>) -> Self {
        Self {
            id: model.id,
            item_id: model.item_id,
            name: model.name,
            account_type: model.account_type,
            currency: model.currency,
            balance: model.balance,
            updated_at: to_utc_string(model.updated_at),
            provider: item.and_then(|item| item.provider),
        }
    }
}

/// Query parameters for transaction listing
#[derive(Debug, Default, Serialize, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TransactionsQuery {
    /// Inclusive lower bound on the booking date
    pub from: Option<String>,
    /// Exclusive upper bound on the booking date
    pub to: Option<String>,
    /// 1-based page number (default 1)
    pub page: Option<i64>,
    /// Rows per page (default 50, clamped to 1..=200)
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: String,
    pub account_id: String,
    pub description: String,
    pub date: String,
    #[schema(value_type = String, example = "-42.50")]
    pub amount: Decimal,
    pub flow: Flow,
    pub category: Option<String>,
    pub currency: String,
}

impl From<transaction::Model> for TransactionView {
    fn from(model: transaction::Model) -> Self {
        Self {
            id: model.id,
            account_id: model.account_id,
            description: model.description,
            date: to_utc_string(model.date),
            amount: model.amount,
            flow: model.flow,
            category: model.category,
            currency: model.currency,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsPage {
    pub results: Vec<TransactionView>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// Issues a connect token for the linking widget
#[utoipa::path(
    get,
    path = "/api/openfinance/connect-token",
    responses(
        (status = 200, description = "Connect token issued", body = ConnectTokenResponse),
        (status = 502, description = "Aggregator error", body = ApiError),
        (status = 503, description = "Aggregator credentials not configured", body = ApiError)
    ),
    tag = "openfinance"
)]
pub async fn connect_token(
    State(state): State<AppState>,
) -> Result<Json<ConnectTokenResponse>, ApiError> {
    let access_token = state.aggregator.create_connect_token().await?;
    Ok(Json(ConnectTokenResponse { access_token }))
}

/// Records a linked item; re-posting an existing id only backfills its provider
#[utoipa::path(
    post,
    path = "/api/openfinance/items",
    request_body = SaveItemRequest,
    responses(
        (status = 200, description = "Item stored", body = SaveItemResponse),
        (status = 400, description = "Missing itemId", body = ApiError)
    ),
    tag = "openfinance"
)]
pub async fn save_item(
    State(state): State<AppState>,
    payload: Result<Json<SaveItemRequest>, JsonRejection>,
) -> Result<Json<SaveItemResponse>, ApiError> {
    let Json(request) = payload?;

    let Some(item_id) = request
        .item_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "ITEM_ID_REQUIRED",
            "itemId is required",
        ));
    };

    let provider = request
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let repo = ItemRepository::new(Arc::new(state.db.clone()));
    let stored = repo.upsert(item_id, provider).await?;
    tracing::info!(item_id = %stored.id, provider = ?stored.provider, "Item linked");

    Ok(Json(SaveItemResponse {
        ok: true,
        item_id: stored.id,
    }))
}

/// Lists linked items, newest first
#[utoipa::path(
    get,
    path = "/api/openfinance/items",
    responses(
        (status = 200, description = "Linked items", body = [ItemView])
    ),
    tag = "openfinance"
)]
pub async fn list_items(State(state): State<AppState>) -> Result<Json<Vec<ItemView>>, ApiError> {
    let repo = ItemRepository::new(Arc::new(state.db.clone()));
    let items = repo.list_all().await?;
    Ok(Json(items.into_iter().map(ItemView::from).collect()))
}

/// Runs a full sync pass over every linked item
#[utoipa::path(
    post,
    path = "/api/openfinance/sync-all",
    request_body(content = SyncRequest, description = "Optional lower date bound"),
    responses(
        (status = 200, description = "Sync report", body = SyncReport),
        (status = 400, description = "Invalid from", body = ApiError),
        (status = 502, description = "Aggregator authentication failed", body = ApiError),
        (status = 503, description = "Aggregator credentials not configured", body = ApiError)
    ),
    tag = "openfinance"
)]
pub async fn sync_all(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SyncReport>, ApiError> {
    let from = resolve_from(&state, &body)?;
    let report = state.orchestrator.sync_all(from).await?;
    Ok(Json(report))
}

/// Syncs a single linked item
#[utoipa::path(
    post,
    path = "/api/openfinance/items/{item_id}/sync",
    params(
        ("item_id" = String, Path, description = "Aggregator item id")
    ),
    request_body(content = SyncRequest, description = "Optional lower date bound"),
    responses(
        (status = 200, description = "Sync report for the item", body = SyncReport),
        (status = 404, description = "Item not linked", body = ApiError),
        (status = 502, description = "Aggregator authentication failed", body = ApiError)
    ),
    tag = "openfinance"
)]
pub async fn sync_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    body: Bytes,
) -> Result<Json<SyncReport>, ApiError> {
    let from = resolve_from(&state, &body)?;
    let report = state.orchestrator.sync_item(&item_id, from).await?;
    Ok(Json(report))
}

/// Lists stored accounts with their item's provider, most recently synced first
#[utoipa::path(
    get,
    path = "/api/openfinance/accounts",
    responses(
        (status = 200, description = "Stored accounts", body = [AccountView])
    ),
    tag = "openfinance"
)]
pub async fn list_accounts(
    State(state): State<AppState>,
) -> Result<Json<Vec<AccountView>>, ApiError> {
    let repo = AccountRepository::new(Arc::new(state.db.clone()));
    let rows = repo.list_with_item().await?;
    Ok(Json(
        rows.into_iter()
            .map(|(account, item)| AccountView::new(account, item))
            .collect(),
    ))
}

/// Pages through stored transactions, newest first
#[utoipa::path(
    get,
    path = "/api/openfinance/transactions",
    params(TransactionsQuery),
    responses(
        (status = 200, description = "Page of transactions", body = TransactionsPage),
        (status = 400, description = "Invalid query", body = ApiError)
    ),
    tag = "openfinance"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    query: Result<Query<TransactionsQuery>, QueryRejection>,
) -> Result<Json<TransactionsPage>, ApiError> {
    let Query(query) = query?;

    let window = DateWindow {
        from: parse_bound("from", query.from.as_deref())?,
        to: parse_bound("to", query.to.as_deref())?,
    };
    let page = query.page.unwrap_or(1).max(1) as u64;
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE) as u64;

    let repo = TransactionRepository::new(Arc::new(state.db.clone()));
    let (rows, total) = repo.list_page(&window, page, page_size).await?;

    Ok(Json(TransactionsPage {
        results: rows.into_iter().map(TransactionView::from).collect(),
        total,
        page,
        page_size,
    }))
}

/// Monthly income and expense totals
#[utoipa::path(
    get,
    path = "/api/openfinance/summary/monthly",
    responses(
        (status = 200, description = "Totals per month and flow", body = [MonthlyTotal])
    ),
    tag = "openfinance"
)]
pub async fn monthly_summary(
    State(state): State<AppState>,
) -> Result<Json<Vec<MonthlyTotal>>, ApiError> {
    let repo = TransactionRepository::new(Arc::new(state.db.clone()));
    Ok(Json(repo.monthly_summary().await?))
}

/// Reads `from` out of an optional JSON body, falling back to the configured default.
fn resolve_from(state: &AppState, body: &Bytes) -> Result<DateTime<Utc>, ApiError> {
    let request: SyncRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice(body).map_err(|err| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                &format!("Invalid JSON: {}", err),
            )
        })?
    };

    match request.from.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| {
            validation_error(
                "from must be an RFC 3339 timestamp or YYYY-MM-DD date",
                json!({ "from": raw }),
            )
        }),
        None => state
            .config
            .sync
            .default_from()
            .map_err(|err| ApiError::from(anyhow::Error::new(err))),
    }
}

fn parse_bound(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw).map(Some).ok_or_else(|| {
            validation_error(
                &format!("{} must be an RFC 3339 timestamp or YYYY-MM-DD date", field),
                json!({ "field": field, "value": raw }),
            )
        }),
    }
}

fn to_utc_string(value: sea_orm::prelude::DateTimeWithTimeZone) -> String {
    value.with_timezone(&Utc).to_rfc3339()
}
