//! Raw records as returned by the aggregator API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One page of a paginated listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    /// Total number of records across all pages, when reported
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAccount {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub account_type: String,
    #[serde(default, alias = "currencyCode")]
    pub currency: Option<String>,
    #[serde(default)]
    pub balance: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub amount: Decimal,
    /// `CREDIT` or `DEBIT` when the aggregator knows the direction
    #[serde(rename = "type", default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub category: Option<RawCategory>,
    #[serde(default, alias = "currencyCode")]
    pub currency: Option<String>,
}

/// Category as sent by the aggregator: either a bare label or a
/// detailed/primary pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCategory {
    Plain(String),
    Structured {
        #[serde(default)]
        detailed: Option<String>,
        #[serde(default)]
        primary: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthResponse {
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectTokenResponse {
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transaction_decodes_aggregator_shape() {
        let raw: RawTransaction = serde_json::from_value(json!({
            "id": "tx-1",
            "accountId": "acc-1",
            "description": "PIX recebido",
            "date": "2024-05-03T00:00:00.000Z",
            "amount": 150.75,
            "type": "CREDIT",
            "category": "Transfers",
            "currencyCode": "BRL"
        }))
        .unwrap();

        assert_eq!(raw.account_id, "acc-1");
        assert_eq!(raw.amount, Decimal::new(15075, 2));
        assert_eq!(raw.transaction_type.as_deref(), Some("CREDIT"));
        assert_eq!(raw.category, Some(RawCategory::Plain("Transfers".to_string())));
        assert_eq!(raw.currency.as_deref(), Some("BRL"));
    }

    #[test]
    fn test_structured_and_null_categories() {
        let structured: RawTransaction = serde_json::from_value(json!({
            "id": "tx-2",
            "accountId": "acc-1",
            "date": "2024-05-03T10:00:00Z",
            "amount": -20,
            "category": { "primary": "Food" }
        }))
        .unwrap();
        assert_eq!(
            structured.category,
            Some(RawCategory::Structured {
                detailed: None,
                primary: Some("Food".to_string())
            })
        );
        assert!(structured.description.is_none());

        let none: RawTransaction = serde_json::from_value(json!({
            "id": "tx-3",
            "accountId": "acc-1",
            "date": "2024-05-03T10:00:00Z",
            "amount": 1,
            "category": null
        }))
        .unwrap();
        assert!(none.category.is_none());
    }

    #[test]
    fn test_page_without_total() {
        let page: Page<RawAccount> = serde_json::from_value(json!({
            "results": [{ "id": "acc-1", "name": "Conta", "type": "BANK", "balance": 10.5 }]
        }))
        .unwrap();
        assert_eq!(page.results.len(), 1);
        assert!(page.total.is_none());
        assert_eq!(page.results[0].balance, Some(Decimal::new(105, 1)));
    }
}
