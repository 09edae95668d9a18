//! # API Handlers
//!
//! HTTP endpoint handlers. Open Finance routes live in [`openfinance`]; this
//! module carries the service-level probes.

use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db;
use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;

pub mod openfinance;

/// Liveness answer for the ping endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PingResponse {
    pub ok: bool,
    /// Server time, RFC3339
    pub ts: String,
}

/// Health/readiness probe body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

impl HealthResponse {
    fn ok(status: &str) -> Self {
        let info = ServiceInfo::default();
        Self {
            status: status.to_string(),
            service: info.service,
            version: info.version,
        }
    }
}

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

#[utoipa::path(
    get,
    path = "/api/ping",
    responses(
        (status = 200, description = "Service is up", body = PingResponse)
    ),
    tag = "root"
)]
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        ok: true,
        ts: Utc::now().to_rfc3339(),
    })
}

/// Liveness probe; never touches dependencies
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::ok("healthy"))
}

/// Readiness probe; succeeds only when the database answers
#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Ready to serve traffic", body = HealthResponse),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "health"
)]
pub async fn readyz(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::warn!(error = %err, "Readiness check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database is not reachable",
        )
        .with_retry_after(5)
    })?;

    Ok(Json(HealthResponse::ok("ready")))
}
