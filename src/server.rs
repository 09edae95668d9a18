//! # Server Configuration
//!
//! Router assembly, shared application state and the HTTP server loop.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::aggregator::{AggregatorClient, CredentialCache, SystemClock, build_http_client};
use crate::config::AppConfig;
use crate::handlers;
use crate::orchestrator::SyncOrchestrator;
use crate::telemetry::{self, TraceContext};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub aggregator: Arc<AggregatorClient>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl AppState {
    /// Wires the aggregator client and orchestrator from configuration.
    pub fn from_config(config: Arc<AppConfig>, db: DatabaseConnection) -> anyhow::Result<Self> {
        let http = build_http_client(&config.aggregator)
            .context("Failed to build aggregator HTTP client")?;
        let credentials = Arc::new(CredentialCache::new(
            http.clone(),
            &config.aggregator,
            Arc::new(SystemClock),
        ));
        let aggregator = Arc::new(AggregatorClient::new(http, &config.aggregator, credentials));
        let orchestrator = Arc::new(
            SyncOrchestrator::new(aggregator.clone(), Arc::new(db.clone()))
                .with_item_timeout(config.sync.item_timeout()),
        );

        Ok(Self {
            config,
            db,
            aggregator,
            orchestrator,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.front_origins);

    let openfinance = Router::new()
        .route("/connect-token", get(handlers::openfinance::connect_token))
        .route(
            "/items",
            get(handlers::openfinance::list_items).post(handlers::openfinance::save_item),
        )
        .route("/items/{item_id}/sync", post(handlers::openfinance::sync_item))
        .route("/sync-all", post(handlers::openfinance::sync_all))
        .route("/accounts", get(handlers::openfinance::list_accounts))
        .route("/transactions", get(handlers::openfinance::list_transactions))
        .route("/summary/monthly", get(handlers::openfinance::monthly_summary));

    Router::new()
        .route("/", get(handlers::root))
        .route("/api/ping", get(handlers::ping))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .nest("/api/openfinance", openfinance)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// An empty origin list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Scopes a trace id to the request and echoes it back as `x-request-id`.
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = TraceContext::from_request_id(
        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    let trace_id = context.trace_id.clone();
    request.extensions_mut().insert(context.clone());

    let mut response = telemetry::with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config.bind_addr().context("Invalid server address")?;
    let config = Arc::new(config);
    let state = AppState::from_config(config.clone(), db)?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::ping,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::openfinance::connect_token,
        crate::handlers::openfinance::save_item,
        crate::handlers::openfinance::list_items,
        crate::handlers::openfinance::sync_all,
        crate::handlers::openfinance::sync_item,
        crate::handlers::openfinance::list_accounts,
        crate::handlers::openfinance::list_transactions,
        crate::handlers::openfinance::monthly_summary,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::Flow,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::handlers::PingResponse,
            crate::handlers::HealthResponse,
            crate::handlers::openfinance::ConnectTokenResponse,
            crate::handlers::openfinance::SaveItemRequest,
            crate::handlers::openfinance::SaveItemResponse,
            crate::handlers::openfinance::ItemView,
            crate::handlers::openfinance::SyncRequest,
            crate::handlers::openfinance::AccountView,
            crate::handlers::openfinance::TransactionView,
            crate::handlers::openfinance::TransactionsPage,
            crate::repositories::MonthlyTotal,
            crate::orchestrator::SyncReport,
            crate::orchestrator::ItemSyncOutcome,
            crate::orchestrator::ItemSyncStatus,
            crate::orchestrator::SyncErrorEntry,
            crate::orchestrator::SyncErrorKind,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "health", description = "Liveness and readiness probes"),
        (name = "openfinance", description = "Item linking, sync and synced data"),
    ),
    info(
        title = "Open Finance Sync API",
        description = "Links Open Finance items and keeps their accounts and transactions in sync",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_openfinance_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/openfinance/connect-token",
            "/api/openfinance/items",
            "/api/openfinance/items/{item_id}/sync",
            "/api/openfinance/sync-all",
            "/api/openfinance/accounts",
            "/api/openfinance/transactions",
            "/api/openfinance/summary/monthly",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
