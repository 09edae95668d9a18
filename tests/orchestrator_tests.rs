//! Integration tests for sync passes: a mocked aggregator over HTTP and a
//! stub data source for timing and reconcile failures.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use openfinance_sync::aggregator::{
    AggregatorClient, AuthError, BankDataSource, CredentialCache, FetchError, RawAccount,
    RawTransaction, SystemClock, build_http_client,
};
use openfinance_sync::models::{Account, Flow, Transaction};
use openfinance_sync::orchestrator::{ItemSyncStatus, SyncError, SyncErrorKind, SyncOrchestrator};
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use serde_json::json;
use test_utils::{insert_account, insert_item, setup_test_db_arc, test_config};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn since() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn orchestrator_for(server: &MockServer, db: Arc<DatabaseConnection>) -> SyncOrchestrator {
    let config = test_config(&server.uri());
    let http = build_http_client(&config.aggregator).unwrap();
    let credentials = Arc::new(CredentialCache::new(
        http.clone(),
        &config.aggregator,
        Arc::new(SystemClock),
    ));
    let client = Arc::new(AggregatorClient::new(http, &config.aggregator, credentials));
    SyncOrchestrator::new(client, db)
}

async fn mount_auth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "apiKey": "key-1" })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_failing_item_does_not_stop_the_pass() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    Mock::given(method("GET"))
        .and(path("/accounts"))
        .and(query_param("itemId", "item-a"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transactions"))
        .and(query_param("itemId", "item-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/accounts"))
        .and(query_param("itemId", "item-b"))
        .and(header("X-API-KEY", "key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "acc-b1", "name": "Conta", "type": "BANK", "balance": 150.75, "currencyCode": "BRL" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transactions"))
        .and(query_param("itemId", "item-b"))
        .and(query_param("from", "2024-01-01T00:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "tx-1", "accountId": "acc-b1", "date": "2024-02-01T10:00:00Z", "amount": -20.5, "type": "DEBIT", "description": "Padaria" },
                { "id": "tx-2", "accountId": "acc-b1", "date": "2024-02-02T10:00:00Z", "amount": 900, "category": "Salary" }
            ],
            "total": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let db = setup_test_db_arc().await?;
    insert_item(&db, "item-a", Some("Bank A")).await?;
    insert_item(&db, "item-b", Some("Bank B")).await?;

    let report = orchestrator_for(&server, db.clone()).sync_all(since()).await?;

    assert_eq!(report.items_processed, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].item_id, "item-a");
    assert_eq!(report.errors[0].kind, SyncErrorKind::RemoteFetch);
    assert_eq!(report.errors[0].status, Some(500));

    let item_a = report.items.iter().find(|i| i.item_id == "item-a").unwrap();
    let item_b = report.items.iter().find(|i| i.item_id == "item-b").unwrap();
    assert_eq!(item_a.status, ItemSyncStatus::Failed);
    assert_eq!(item_b.status, ItemSyncStatus::Succeeded);
    assert_eq!(item_b.accounts_upserted, 1);
    assert_eq!(item_b.transactions_upserted, 2);
    assert_eq!(report.failed_item_ids(), vec!["item-a"]);

    assert_eq!(Transaction::find().count(&*db).await?, 2);
    let income = Transaction::find_by_id("tx-2").one(&*db).await?.unwrap();
    assert_eq!(income.flow, Flow::Income);
    assert_eq!(income.category.as_deref(), Some("Salary"));
    Ok(())
}

#[tokio::test]
async fn test_auth_failure_aborts_before_any_item() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid client"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let db = setup_test_db_arc().await?;
    insert_item(&db, "item-a", None).await?;

    let result = orchestrator_for(&server, db).sync_all(since()).await;
    match result {
        Err(SyncError::Auth(AuthError::Rejected { status, .. })) => assert_eq!(status, 401),
        other => panic!("expected auth failure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_sync_item_unknown_item_is_not_found() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "apiKey": "key-1" })))
        .expect(0)
        .mount(&server)
        .await;

    let db = setup_test_db_arc().await?;
    let result = orchestrator_for(&server, db).sync_item("nope", since()).await;

    assert!(matches!(result, Err(SyncError::ItemNotFound(id)) if id == "nope"));
    Ok(())
}

#[tokio::test]
async fn test_sync_item_runs_only_that_item() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_auth(&server).await;
    Mock::given(method("GET"))
        .and(path("/accounts"))
        .and(query_param("itemId", "item-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "id": "acc-b1", "name": "Conta", "type": "BANK" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transactions"))
        .and(query_param("itemId", "item-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [], "total": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let db = setup_test_db_arc().await?;
    insert_item(&db, "item-a", None).await?;
    insert_item(&db, "item-b", None).await?;

    let report = orchestrator_for(&server, db).sync_item("item-b", since()).await?;

    assert_eq!(report.items_processed, 1);
    assert!(report.errors.is_empty());
    assert_eq!(report.items[0].item_id, "item-b");
    assert_eq!(report.items[0].accounts_upserted, 1);
    Ok(())
}

/// In-process data source with canned answers.
struct StubSource {
    accounts: Vec<RawAccount>,
    transactions: Vec<RawTransaction>,
    transactions_error: Option<FetchError>,
    delay: Option<Duration>,
}

#[async_trait]
impl BankDataSource for StubSource {
    async fn authenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn fetch_accounts(&self, _item_id: &str) -> Result<Vec<RawAccount>, FetchError> {
        Ok(self.accounts.clone())
    }

    async fn fetch_transactions(
        &self,
        _item_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<RawTransaction>, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.transactions_error {
            return Err(err.clone());
        }
        Ok(self.transactions.clone())
    }
}

fn stub(delay: Option<Duration>) -> StubSource {
    StubSource {
        accounts: vec![
            serde_json::from_value(json!({ "id": "acc-1", "name": "Checking", "type": "BANK" }))
                .unwrap(),
        ],
        transactions: vec![
            serde_json::from_value(json!({
                "id": "tx-1", "accountId": "acc-1", "date": "2024-03-01T00:00:00Z", "amount": -3
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "id": "tx-2", "accountId": "acc-unknown", "date": "2024-03-02T00:00:00Z", "amount": 4
            }))
            .unwrap(),
        ],
        transactions_error: None,
        delay,
    }
}

fn raw_account(id: &str) -> RawAccount {
    serde_json::from_value(json!({ "id": id, "name": "Conta", "type": "BANK" })).unwrap()
}

#[tokio::test]
async fn test_rejected_records_make_item_partial() -> anyhow::Result<()> {
    let db = setup_test_db_arc().await?;
    insert_item(&db, "item-1", None).await?;

    let orchestrator = SyncOrchestrator::new(Arc::new(stub(None)), db.clone());
    let report = orchestrator.sync_all(since()).await?;

    assert_eq!(report.items[0].status, ItemSyncStatus::Partial);
    assert_eq!(report.items[0].transactions_upserted, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, SyncErrorKind::Reconcile);
    assert_eq!(report.errors[0].record_id.as_deref(), Some("tx-2"));
    Ok(())
}

#[tokio::test]
async fn test_item_timeout_is_reported_as_fetch_failure() -> anyhow::Result<()> {
    let db = setup_test_db_arc().await?;
    insert_item(&db, "slow", None).await?;

    let orchestrator = SyncOrchestrator::new(Arc::new(stub(Some(Duration::from_secs(5)))), db)
        .with_item_timeout(Some(Duration::from_millis(50)));
    let report = orchestrator.sync_all(since()).await?;

    assert_eq!(report.items[0].status, ItemSyncStatus::Failed);
    // Accounts were stored before the transaction fetch stalled
    assert_eq!(report.items[0].accounts_upserted, 1);
    assert_eq!(report.errors[0].kind, SyncErrorKind::RemoteFetch);
    assert_eq!(report.errors[0].status, None);

    let serialized = serde_json::to_value(&report)?;
    assert_eq!(serialized["itemsProcessed"], 1);
    assert_eq!(serialized["errors"][0]["kind"], "remote_fetch");
    assert_eq!(serialized["items"][0]["status"], "failed");
    Ok(())
}

#[tokio::test]
async fn test_account_rejections_survive_a_later_fetch_failure() -> anyhow::Result<()> {
    let db = setup_test_db_arc().await?;
    insert_item(&db, "item-1", None).await?;
    insert_item(&db, "item-other", None).await?;
    insert_account(&db, "item-other", "acc-taken").await?;

    let source = StubSource {
        accounts: vec![raw_account("acc-own"), raw_account("acc-taken")],
        transactions: Vec::new(),
        transactions_error: Some(FetchError::Status {
            status: 500,
            body: "upstream exploded".to_string(),
        }),
        delay: None,
    };
    let report = SyncOrchestrator::new(Arc::new(source), db.clone())
        .sync_all(since())
        .await?;

    let item = report.items.iter().find(|i| i.item_id == "item-1").unwrap();
    assert_eq!(item.status, ItemSyncStatus::Failed);
    assert_eq!(item.accounts_upserted, 1);

    let item_errors: Vec<_> = report.errors.iter().filter(|e| e.item_id == "item-1").collect();
    assert_eq!(item_errors.len(), 2);
    assert_eq!(item_errors[0].kind, SyncErrorKind::Reconcile);
    assert_eq!(item_errors[0].record_id.as_deref(), Some("acc-taken"));
    assert!(item_errors[0].message.contains("item-other"));
    assert_eq!(item_errors[1].kind, SyncErrorKind::RemoteFetch);
    assert_eq!(item_errors[1].status, Some(500));

    // The shared account keeps its first owner
    let taken = Account::find_by_id("acc-taken").one(&*db).await?.unwrap();
    assert_eq!(taken.item_id, "item-other");
    Ok(())
}

#[tokio::test]
async fn test_timeout_during_upsert_counts_rows_already_written() -> anyhow::Result<()> {
    let db = setup_test_db_arc().await?;
    insert_item(&db, "big", None).await?;

    let transactions = (0..3_000)
        .map(|n| {
            serde_json::from_value(json!({
                "id": format!("tx-{n}"),
                "accountId": "acc-1",
                "date": "2024-03-01T00:00:00Z",
                "amount": -1
            }))
            .unwrap()
        })
        .collect();
    let source = StubSource {
        accounts: vec![raw_account("acc-1")],
        transactions,
        transactions_error: None,
        delay: None,
    };
    let report = SyncOrchestrator::new(Arc::new(source), db.clone())
        .with_item_timeout(Some(Duration::from_millis(25)))
        .sync_all(since())
        .await?;

    let item = &report.items[0];
    let stored = Transaction::find().count(&*db).await? as usize;
    // A row whose write was in flight when the limit hit may land uncounted
    assert!(
        stored >= item.transactions_upserted && stored - item.transactions_upserted <= 1,
        "stored {stored}, reported {}",
        item.transactions_upserted
    );
    if item.status == ItemSyncStatus::Failed {
        assert_eq!(item.accounts_upserted, 1);
        assert_eq!(report.errors[0].kind, SyncErrorKind::RemoteFetch);
    }
    Ok(())
}
