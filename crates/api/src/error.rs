//! API error type
//!
//! Every handler returns `ApiResult<T>`. Errors render as
//! `{"detail": "...", "code": <status>}`; database and internal failures are
//! logged and replaced with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    /// Upstream service (email, LLM, Google) failed
    #[error("{0}")]
    ExternalService(String),

    /// Upstream service is not configured on this deployment
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Required service key missing; the message is shown to the caller
    #[error("{0}")]
    Misconfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[cfg(feature = "billing")]
    #[error("Billing error: {0}")]
    Billing(#[from] mcd_billing::BillingError),
}

impl From<mcd_shared::SharedError> for ApiError {
    fn from(e: mcd_shared::SharedError) -> Self {
        match e {
            mcd_shared::SharedError::Database(e) => ApiError::Database(e),
            mcd_shared::SharedError::Migration(e) => ApiError::Internal(e.to_string()),
            other => ApiError::Validation(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Misconfigured(_) | ApiError::Internal(_) | ApiError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Auth(e) => e.status(),
            #[cfg(feature = "billing")]
            ApiError::Billing(e) => billing_status(e),
        }
    }
}

#[cfg(feature = "billing")]
fn billing_status(e: &mcd_billing::BillingError) -> StatusCode {
    use mcd_billing::BillingError;
    match e {
        BillingError::WebhookSignatureInvalid => StatusCode::BAD_REQUEST,
        BillingError::InvalidTier(_) | BillingError::PriceNotConfigured(_) => {
            StatusCode::BAD_REQUEST
        }
        BillingError::OrganizationNotFound(_) | BillingError::CustomerNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        BillingError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        BillingError::StripeApi(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Auth(e) = self {
            return e.into_response();
        }

        let status = self.status();
        let detail = match &self {
            ApiError::Database(e) => {
                tracing::error!(error = ?e, "Database error");
                "Internal server error".to_string()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "Internal server error".to_string()
            }
            #[cfg(feature = "billing")]
            ApiError::Billing(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %e, "Billing error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "detail": detail,
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let response = ApiError::NotFound("Coach not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "Coach not found");
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn test_database_error_is_masked() {
        let response = ApiError::Database(sqlx::Error::RowNotFound).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "Internal server error");
    }

    #[tokio::test]
    async fn test_external_service_is_bad_gateway() {
        let response = ApiError::ExternalService("Email failed: timeout".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "Email failed: timeout");
    }

    #[tokio::test]
    async fn test_misconfigured_keeps_message() {
        let response = ApiError::Misconfigured("LLM API key not configured".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "LLM API key not configured");
    }

    #[tokio::test]
    async fn test_conflict_keeps_message() {
        let response = ApiError::Conflict("This invite has already been used".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "This invite has already been used");
        assert_eq!(body["code"], 409);
    }

    #[test]
    fn test_validation_from_shared_error() {
        let err: ApiError = mcd_shared::validate_password("short").unwrap_err().into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Password must be at least 8 characters long");
    }
}
