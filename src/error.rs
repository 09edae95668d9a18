//! # Error Handling
//!
//! Unified error handling for the HTTP surface. Every failure is rendered as
//! an `application/problem+json` body carrying a machine-readable code and the
//! request's trace id.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::aggregator::{AuthError, FetchError};
use crate::orchestrator::SyncError;
use crate::telemetry;

/// Upstream bodies embedded in error details are cut to this many characters.
const DETAIL_SNIPPET_CHARS: usize = 200;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Trace id of the current request, or a short correlation id outside one.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Standard error types with predefined status codes
#[derive(Debug, Error)]
pub enum ErrorType {
    #[error("Bad Request")]
    BadRequest,
    #[error("Not Found")]
    NotFound,
    #[error("Internal Server Error")]
    InternalServerError,
    #[error("Bad Gateway")]
    BadGateway,
    #[error("Service Unavailable")]
    ServiceUnavailable,
}

impl ErrorType {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorType::BadRequest => StatusCode::BAD_REQUEST,
            ErrorType::NotFound => StatusCode::NOT_FOUND,
            ErrorType::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorType::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorType::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ErrorType::BadRequest => "VALIDATION_FAILED",
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorType::BadGateway => "PROVIDER_ERROR",
            ErrorType::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

/// Upstream aggregator error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    /// Upstream identifier, e.g. "pluggy"
    pub provider: String,
    /// HTTP status code from upstream
    pub status: u16,
    /// Response body snippet from upstream
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<ErrorType> for ApiError {
    fn from(error_type: ErrorType) -> Self {
        Self::new(
            error_type.status_code(),
            error_type.error_code(),
            &error_type.to_string(),
        )
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            &format!("Invalid query string: {}", rejection.body_text()),
        )
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredentials => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "AGGREGATOR_NOT_CONFIGURED",
                "Aggregator credentials are not configured",
            ),
            AuthError::Rejected { status, body } => Self::new(
                StatusCode::BAD_GATEWAY,
                "AGGREGATOR_AUTH_FAILED",
                "Aggregator rejected the configured credentials",
            )
            .with_details(json!(ProviderError {
                provider: "pluggy".to_string(),
                status,
                body_snippet: Some(truncate(body)),
            })),
            other => {
                tracing::warn!(error = %other, "Aggregator credential exchange failed");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "AGGREGATOR_AUTH_FAILED",
                    "Aggregator credential exchange failed",
                )
            }
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Auth(auth) => auth.into(),
            FetchError::Status { status, body } => {
                provider_error("pluggy".to_string(), status, Some(body))
            }
            FetchError::Transport { details, timed_out } => {
                let status = if timed_out {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                };
                Self::new(status, "PROVIDER_ERROR", "Aggregator is unreachable")
                    .with_details(json!({ "reason": truncate(details) }))
            }
            FetchError::Malformed { details } => Self::new(
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
                "Aggregator returned an unexpected response",
            )
            .with_details(json!({ "reason": truncate(details) })),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::Auth(auth) => auth.into(),
            SyncError::ItemNotFound(item_id) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Item {} is not linked", item_id),
            ),
            SyncError::Storage(err) => err.into(),
        }
    }
}

/// Create an upstream aggregator error (always 502)
pub fn provider_error(provider: String, status: u16, body: Option<String>) -> ApiError {
    let message = format!("Provider {} returned error status {}", provider, status);
    let details = ProviderError {
        provider,
        status,
        body_snippet: body.map(truncate),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", &message).with_details(json!(details))
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

fn truncate(body: String) -> String {
    if body.chars().count() > DETAIL_SNIPPET_CHARS {
        let truncated: String = body.chars().take(DETAIL_SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "ITEM_ID_REQUIRED", "itemId is required");

        assert_eq!(error.code, Box::from("ITEM_ID_REQUIRED"));
        assert_eq!(error.message, Box::from("itemId is required"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_content_type_and_retry_after_headers() {
        let response = ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", "busy")
            .with_retry_after(30)
            .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
        assert_eq!(response.headers().get("retry-after").unwrap(), "30");
    }

    #[test]
    fn test_trace_id_fallback_outside_request() {
        let error: ApiError = ErrorType::NotFound.into();
        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_from_anyhow_hides_details() {
        let api_error: ApiError = anyhow::anyhow!("connection pool exhausted").into();

        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_missing_credentials_is_service_unavailable() {
        let api_error: ApiError = AuthError::MissingCredentials.into();

        assert_eq!(api_error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api_error.code, Box::from("AGGREGATOR_NOT_CONFIGURED"));
    }

    #[test]
    fn test_rejected_credentials_is_bad_gateway_with_status() {
        let api_error: ApiError = AuthError::Rejected {
            status: 403,
            body: "invalid client".to_string(),
        }
        .into();

        assert_eq!(api_error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(api_error.code, Box::from("AGGREGATOR_AUTH_FAILED"));
        let details = api_error.details.unwrap();
        assert_eq!(details["status"], 403);
    }

    #[test]
    fn test_fetch_status_maps_to_provider_error() {
        for upstream in [400u16, 404, 429, 500, 503] {
            let api_error: ApiError = FetchError::Status {
                status: upstream,
                body: "nope".to_string(),
            }
            .into();

            assert_eq!(api_error.status, StatusCode::BAD_GATEWAY);
            assert_eq!(api_error.code, Box::from("PROVIDER_ERROR"));
            let details = api_error.details.unwrap();
            assert_eq!(details["provider"], "pluggy");
            assert_eq!(details["status"], upstream);
        }
    }

    #[test]
    fn test_fetch_timeout_maps_to_gateway_timeout() {
        let api_error: ApiError = FetchError::timed_out(std::time::Duration::from_secs(5)).into();
        assert_eq!(api_error.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(api_error.code, Box::from("PROVIDER_ERROR"));
    }

    #[test]
    fn test_sync_errors() {
        let not_found: ApiError = SyncError::ItemNotFound("item-9".to_string()).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert!(not_found.message.contains("item-9"));

        let auth: ApiError = SyncError::Auth(AuthError::MissingCredentials).into();
        assert_eq!(auth.status, StatusCode::SERVICE_UNAVAILABLE);

        let storage: ApiError = SyncError::Storage(anyhow::anyhow!("disk")).into();
        assert_eq!(storage.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("item".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);

        let api_error: ApiError = sea_orm::DbErr::Custom("boom".to_string()).into();
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.message, Box::from("Database error occurred"));
    }

    #[test]
    fn test_validation_error_with_details() {
        let field_errors = json!({ "pageSize": "must be a number" });
        let error = validation_error("Validation failed", field_errors.clone());

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.details, Some(Box::new(field_errors)));
    }

    #[test]
    fn test_utf8_safe_truncation() {
        let body = "çãõ ünïcödé 🚀 ".repeat(40);
        let error = provider_error("pluggy".to_string(), 500, Some(body));

        let details = error.details.unwrap();
        let snippet = details["body_snippet"].as_str().unwrap();
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), DETAIL_SNIPPET_CHARS + 3);
        assert!(snippet.starts_with("çãõ ünïcödé"));
    }
}
