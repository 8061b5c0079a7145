//! Scheduled observations

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use mcd_shared::{new_id, IdPrefix};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::CoachRow,
    state::AppState,
};

/// Select list for `ScheduledObservationItem`; callers append WHERE/ORDER
pub(crate) const SCHEDULE_ITEM_QUERY: &str = "SELECT s.schedule_id, s.coach_id, s.observer_id, \
     s.scheduled_date, s.session_context, s.status, s.created_at, \
     c.name AS coach_name, u.name AS observer_name \
     FROM scheduled_observations s \
     LEFT JOIN coaches c ON c.id = s.coach_id \
     LEFT JOIN users u ON u.user_id = s.observer_id";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScheduledObservationItem {
    pub schedule_id: String,
    pub coach_id: String,
    pub observer_id: String,
    pub scheduled_date: String,
    pub session_context: Option<String>,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub coach_name: Option<String>,
    pub observer_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

/// Accept `YYYY-MM-DD`, optionally followed by a time part
fn validate_scheduled_date(date: &str) -> ApiResult<()> {
    let day = date.get(..10).unwrap_or(date);
    let format = time::macros::format_description!("[year]-[month]-[day]");
    time::Date::parse(day, &format)
        .map(|_| ())
        .map_err(|_| ApiError::BadRequest("scheduled_date must be YYYY-MM-DD".to_string()))
}

async fn find_item(state: &AppState, schedule_id: &str) -> ApiResult<ScheduledObservationItem> {
    sqlx::query_as::<_, ScheduledObservationItem>(&format!(
        "{} WHERE s.schedule_id = $1",
        SCHEDULE_ITEM_QUERY
    ))
    .bind(schedule_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Scheduled observation not found".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleCreate {
    pub coach_id: String,
    pub scheduled_date: String,
    pub session_context: Option<String>,
}

pub async fn create_scheduled(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ScheduleCreate>,
) -> ApiResult<Json<ScheduledObservationItem>> {
    auth_user.require_staff()?;
    validate_scheduled_date(&req.scheduled_date)?;

    if CoachRow::find_by_id(&state.pool, &req.coach_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound("Coach not found".to_string()));
    }

    let schedule_id = new_id(IdPrefix::Schedule);
    sqlx::query(
        "INSERT INTO scheduled_observations (schedule_id, coach_id, observer_id, scheduled_date, \
         session_context) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&schedule_id)
    .bind(&req.coach_id)
    .bind(auth_user.user_id())
    .bind(&req.scheduled_date)
    .bind(&req.session_context)
    .execute(&state.pool)
    .await?;

    tracing::info!(schedule_id = %schedule_id, coach_id = %req.coach_id, observer_id = %auth_user.user_id(), "Observation scheduled");
    Ok(Json(find_item(&state, &schedule_id).await?))
}

pub async fn list_scheduled(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ScheduledObservationItem>>> {
    auth_user.require_staff()?;

    let items = sqlx::query_as::<_, ScheduledObservationItem>(&format!(
        "{} WHERE s.observer_id = $1 ORDER BY s.scheduled_date ASC LIMIT 200",
        SCHEDULE_ITEM_QUERY
    ))
    .bind(auth_user.user_id())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: ScheduleStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(schedule_id): Path<String>,
    Json(req): Json<StatusUpdate>,
) -> ApiResult<Json<ScheduledObservationItem>> {
    auth_user.require_staff()?;

    let updated = sqlx::query(
        "UPDATE scheduled_observations SET status = $1 WHERE schedule_id = $2 AND observer_id = $3",
    )
    .bind(req.status.as_str())
    .bind(&schedule_id)
    .bind(auth_user.user_id())
    .execute(&state.pool)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(ApiError::NotFound(
            "Scheduled observation not found".to_string(),
        ));
    }

    Ok(Json(find_item(&state, &schedule_id).await?))
}

pub async fn delete_scheduled(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(schedule_id): Path<String>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let deleted = sqlx::query(
        "DELETE FROM scheduled_observations WHERE schedule_id = $1 AND observer_id = $2",
    )
    .bind(&schedule_id)
    .bind(auth_user.user_id())
    .execute(&state.pool)
    .await?
    .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound(
            "Scheduled observation not found".to_string(),
        ));
    }

    tracing::info!(schedule_id = %schedule_id, observer_id = %auth_user.user_id(), "Scheduled observation deleted");
    Ok(Json(super::status_body("deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_date_validation() {
        assert!(validate_scheduled_date("2026-11-03").is_ok());
        assert!(validate_scheduled_date("2026-11-03T18:30:00").is_ok());
        assert!(validate_scheduled_date("03/11/2026").is_err());
        assert!(validate_scheduled_date("2026-13-01").is_err());
        assert!(validate_scheduled_date("").is_err());
    }

    #[test]
    fn test_status_parsing() {
        let update: StatusUpdate = serde_json::from_str(r#"{"status": "cancelled"}"#).unwrap();
        assert_eq!(update.status, ScheduleStatus::Cancelled);
        assert!(serde_json::from_str::<StatusUpdate>(r#"{"status": "done"}"#).is_err());
    }
}
