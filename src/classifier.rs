//! # Transaction Classifier
//!
//! Maps raw aggregator transactions onto the local income/expense taxonomy.
//! Everything here is pure; a record classifies the same way no matter which
//! page it arrived on.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::aggregator::{RawCategory, RawTransaction};
use crate::models::Flow;

pub const DEFAULT_CURRENCY: &str = "BRL";

/// A raw transaction annotated with its flow and category, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedTransaction {
    pub id: String,
    pub account_id: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub amount: Decimal,
    pub flow: Flow,
    pub category: Option<String>,
    pub currency: String,
}

/// `CREDIT` is income and `DEBIT` is expense; anything else falls back to the sign of the amount.
pub fn classify_flow(raw: &RawTransaction) -> Flow {
    match raw.transaction_type.as_deref() {
        Some("CREDIT") => Flow::Income,
        Some("DEBIT") => Flow::Expense,
        _ if raw.amount < Decimal::ZERO => Flow::Expense,
        _ => Flow::Income,
    }
}

/// A plain label is used verbatim; a structured one prefers `detailed` over `primary`.
pub fn classify_category(raw: &RawTransaction) -> Option<String> {
    match raw.category.as_ref()? {
        RawCategory::Plain(label) => Some(label.clone()),
        RawCategory::Structured { detailed, primary } => detailed.clone().or_else(|| primary.clone()),
    }
}

pub fn classify(raw: &RawTransaction) -> ClassifiedTransaction {
    ClassifiedTransaction {
        id: raw.id.clone(),
        account_id: raw.account_id.clone(),
        description: raw.description.clone().unwrap_or_default(),
        date: raw.date,
        amount: raw.amount,
        flow: classify_flow(raw),
        category: classify_category(raw),
        currency: raw
            .currency
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
    }
}
