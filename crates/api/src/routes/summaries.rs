//! AI-generated session summaries and coach trend reports

use axum::{extract::State, Extension, Json};
use serde::Serialize;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    llm::{CoachTrendRequest, LlmError, SessionSummaryRequest},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    pub trend_summary: String,
}

fn llm_failure(e: LlmError, what: &str) -> ApiError {
    match e {
        LlmError::NotConfigured => ApiError::Misconfigured(e.to_string()),
        LlmError::Upstream(msg) => {
            tracing::error!(error = %msg, "LLM request failed");
            ApiError::ExternalService(format!("Failed to generate {}: {}", what, msg))
        }
    }
}

pub async fn generate_summary(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<SessionSummaryRequest>,
) -> ApiResult<Json<SummaryResponse>> {
    tracing::info!(session_name = %req.session_name, user_id = %auth_user.user_id(), "Generating session summary");

    let summary = state
        .llm
        .session_summary(&req)
        .await
        .map_err(|e| llm_failure(e, "summary"))?;

    Ok(Json(SummaryResponse { summary }))
}

pub async fn generate_coach_trends(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CoachTrendRequest>,
) -> ApiResult<Json<TrendResponse>> {
    tracing::info!(coach_name = %req.coach_name, sessions = req.sessions_data.len(), user_id = %auth_user.user_id(), "Generating coach trends");

    let trend_summary = state
        .llm
        .coach_trends(&req)
        .await
        .map_err(|e| llm_failure(e, "trends"))?;

    Ok(Json(TrendResponse { trend_summary }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_missing_key_is_server_error_with_message() {
        let err = llm_failure(LlmError::NotConfigured, "summary");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "LLM API key not configured");
    }

    #[test]
    fn test_upstream_failure_is_bad_gateway() {
        let err = llm_failure(LlmError::Upstream("rate limited".into()), "trends");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "Failed to generate trends: rate limited");
    }
}
