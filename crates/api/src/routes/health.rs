//! Liveness and deployment diagnostics

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

const STATUS_CHECK_LIMIT: i64 = 1000;

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello World" }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Health check database probe failed");
            "unavailable"
        }
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConfigCheckResponse {
    pub sender_email: String,
    pub app_url: String,
    pub email_configured: bool,
    pub llm_configured: bool,
    pub billing_configured: bool,
}

/// Which integrations are wired up, without revealing any secret
pub async fn config_check(State(state): State<AppState>) -> Json<ConfigCheckResponse> {
    Json(ConfigCheckResponse {
        sender_email: state.config.sender_email.clone(),
        app_url: state.config.app_url.clone(),
        email_configured: state.config.email_configured(),
        llm_configured: state.config.llm_configured(),
        billing_configured: state.billing_configured(),
    })
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StatusCheck {
    pub id: String,
    pub client_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct StatusCheckCreate {
    pub client_name: String,
}

fn client_name(req: &StatusCheckCreate) -> ApiResult<&str> {
    let name = req.client_name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("client_name is required".to_string()));
    }
    Ok(name)
}

pub async fn create_status_check(
    State(state): State<AppState>,
    Json(req): Json<StatusCheckCreate>,
) -> ApiResult<Json<StatusCheck>> {
    let name = client_name(&req)?;

    let check = sqlx::query_as::<_, StatusCheck>(
        "INSERT INTO status_checks (client_name) VALUES ($1) RETURNING id, client_name, timestamp",
    )
    .bind(name)
    .fetch_one(&state.pool)
    .await?;

    tracing::debug!(id = %check.id, client_name = %check.client_name, "Status check recorded");
    Ok(Json(check))
}

pub async fn list_status_checks(State(state): State<AppState>) -> ApiResult<Json<Vec<StatusCheck>>> {
    let checks = sqlx::query_as::<_, StatusCheck>(
        "SELECT id, client_name, timestamp FROM status_checks ORDER BY timestamp LIMIT $1",
    )
    .bind(STATUS_CHECK_LIMIT)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(checks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_status_check_shape() {
        let check = StatusCheck {
            id: "3f1c".to_string(),
            client_name: "ios".to_string(),
            timestamp: datetime!(2026-03-01 09:30:00 UTC),
        };
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["id"], "3f1c");
        assert_eq!(json["client_name"], "ios");
        assert_eq!(json["timestamp"], "2026-03-01T09:30:00Z");
    }

    #[test]
    fn test_client_name_trimmed_and_required() {
        let req: StatusCheckCreate = serde_json::from_str(r#"{"client_name": " web "}"#).unwrap();
        assert_eq!(client_name(&req).unwrap(), "web");

        let blank = StatusCheckCreate {
            client_name: "  ".to_string(),
        };
        assert!(matches!(client_name(&blank), Err(ApiError::BadRequest(_))));
        assert!(serde_json::from_str::<StatusCheckCreate>("{}").is_err());
    }
}
