//! Observation sessions (cloud sync)

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use mcd_shared::SessionStatus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{types::Json as SqlJson, FromRow};
use time::OffsetDateTime;

use crate::{
    access,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::{CoachReflectionRow, ObservationRow, OBSERVATION_COLUMNS},
    state::AppState,
};

fn session_not_found() -> ApiError {
    ApiError::NotFound("Session not found".to_string())
}

#[derive(Debug, Serialize)]
pub struct SessionListItem {
    pub session_id: String,
    pub name: String,
    pub coach_id: Option<String>,
    pub coach_name: Option<String>,
    pub status: String,
    pub observation_context: String,
    pub planned_date: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub total_duration: f64,
    pub event_count: usize,
}

#[derive(Debug, FromRow)]
struct SessionWithNames {
    #[sqlx(flatten)]
    session: ObservationRow,
    coach_name: Option<String>,
    observer_name: Option<String>,
}

const NAME_COLUMNS: &str = "(SELECT c.name FROM coaches c WHERE c.id = observation_sessions.coach_id) AS coach_name, \
     (SELECT u.name FROM users u WHERE u.user_id = observation_sessions.observer_id) AS observer_name";

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<SessionListItem>>> {
    auth_user.require_staff()?;

    let rows = sqlx::query_as::<_, SessionWithNames>(&format!(
        "SELECT {}, {} FROM observation_sessions WHERE observer_id = $1 \
         ORDER BY updated_at DESC LIMIT 200",
        OBSERVATION_COLUMNS, NAME_COLUMNS
    ))
    .bind(auth_user.user_id())
    .fetch_all(&state.pool)
    .await?;

    let sessions = rows
        .into_iter()
        .map(|row| {
            let event_count = row.session.event_count();
            let s = row.session;
            SessionListItem {
                session_id: s.session_id,
                name: s.name,
                coach_id: s.coach_id,
                coach_name: row.coach_name,
                status: s.status,
                observation_context: s.observation_context,
                planned_date: s.planned_date,
                created_at: s.created_at,
                updated_at: s.updated_at,
                total_duration: s.total_duration,
                event_count,
            }
        })
        .collect();

    Ok(Json(sessions))
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: ObservationRow,
    pub coach_name: Option<String>,
    pub observer_name: Option<String>,
}

/// Append the coach's own reflection unless an entry with its id is already
/// present
pub(crate) fn merge_coach_reflection(entries: &mut Vec<Value>, reflection: &CoachReflectionRow) {
    let already_present = entries
        .iter()
        .any(|e| e.get("id").and_then(Value::as_str) == Some(reflection.reflection_id.as_str()));
    if !already_present {
        entries.push(reflection.as_session_entry());
    }
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionDetail>> {
    let scope = access::session_scope(&auth_user.user)?;

    let row = sqlx::query_as::<_, SessionWithNames>(&format!(
        "SELECT {}, {} FROM observation_sessions WHERE session_id = $1 AND {} = $2",
        OBSERVATION_COLUMNS,
        NAME_COLUMNS,
        scope.column()
    ))
    .bind(&session_id)
    .bind(scope.value())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(session_not_found)?;

    let mut session = row.session;
    if let Some(coach_id) = &session.coach_id {
        if let Some(reflection) =
            CoachReflectionRow::find_for_session(&state.pool, &session_id, coach_id).await?
        {
            merge_coach_reflection(&mut session.coach_reflections.0, &reflection);
        }
    }

    Ok(Json(SessionDetail {
        session,
        coach_name: row.coach_name,
        observer_name: row.observer_name,
    }))
}

fn default_context() -> String {
    "training".to_string()
}

/// Session document as sent by the observation app
#[derive(Debug, Deserialize)]
pub struct ObservationSessionInput {
    pub session_id: Option<String>,
    pub name: String,
    pub coach_id: Option<String>,
    #[serde(default = "default_context")]
    pub observation_context: String,
    #[serde(default)]
    pub status: SessionStatus,
    pub planned_date: Option<String>,
    #[serde(default)]
    pub intervention_types: Vec<Value>,
    pub descriptor_group1: Option<Value>,
    pub descriptor_group2: Option<Value>,
    #[serde(default)]
    pub session_parts: Vec<Value>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(default)]
    pub total_duration: f64,
    #[serde(default)]
    pub ball_rolling_time: f64,
    #[serde(default)]
    pub ball_not_rolling_time: f64,
    #[serde(default)]
    pub ball_rolling: bool,
    pub active_part_id: Option<String>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub ball_rolling_log: Vec<Value>,
    #[serde(default)]
    pub observer_reflections: Vec<Value>,
    #[serde(default)]
    pub coach_reflections: Vec<Value>,
    #[serde(default)]
    pub session_notes: String,
    #[serde(default)]
    pub ai_summary: String,
    #[serde(default)]
    pub attachments: Vec<Value>,
}

/// Columns written from an `ObservationSessionInput`, bound as $3.. in order
const INPUT_COLUMNS: [&str; 24] = [
    "name",
    "coach_id",
    "observation_context",
    "status",
    "planned_date",
    "intervention_types",
    "descriptor_group1",
    "descriptor_group2",
    "session_parts",
    "start_time",
    "end_time",
    "total_duration",
    "ball_rolling_time",
    "ball_not_rolling_time",
    "ball_rolling",
    "active_part_id",
    "events",
    "ball_rolling_log",
    "observer_reflections",
    "coach_reflections",
    "session_notes",
    "ai_summary",
    "attachments",
    "updated_at",
];

fn upsert_sql() -> String {
    let columns = INPUT_COLUMNS.join(", ");
    let placeholders = (3..INPUT_COLUMNS.len() + 3)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = INPUT_COLUMNS
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO observation_sessions (session_id, observer_id, {columns}) \
         VALUES ($1, $2, {placeholders}) \
         ON CONFLICT (session_id) DO UPDATE SET {updates} \
         WHERE observation_sessions.observer_id = EXCLUDED.observer_id"
    )
}

fn update_sql() -> String {
    let assignments = INPUT_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", c, i + 3))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE observation_sessions SET {} WHERE session_id = $1 AND observer_id = $2",
        assignments
    )
}

/// Run `sql` with the session id, observer id and input fields bound
async fn write_session(
    state: &AppState,
    sql: &str,
    session_id: &str,
    observer_id: &str,
    input: ObservationSessionInput,
    now: OffsetDateTime,
) -> ApiResult<u64> {
    let affected = sqlx::query(sql)
        .bind(session_id)
        .bind(observer_id)
        .bind(input.name)
        .bind(input.coach_id)
        .bind(input.observation_context)
        .bind(input.status.as_str())
        .bind(input.planned_date)
        .bind(SqlJson(input.intervention_types))
        .bind(input.descriptor_group1.map(SqlJson))
        .bind(input.descriptor_group2.map(SqlJson))
        .bind(SqlJson(input.session_parts))
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(input.total_duration)
        .bind(input.ball_rolling_time)
        .bind(input.ball_not_rolling_time)
        .bind(input.ball_rolling)
        .bind(input.active_part_id)
        .bind(SqlJson(input.events))
        .bind(SqlJson(input.ball_rolling_log))
        .bind(SqlJson(input.observer_reflections))
        .bind(SqlJson(input.coach_reflections))
        .bind(input.session_notes)
        .bind(input.ai_summary)
        .bind(SqlJson(input.attachments))
        .bind(now)
        .execute(&state.pool)
        .await?
        .rows_affected();
    Ok(affected)
}

fn synced_body(session_id: &str, now: OffsetDateTime) -> Value {
    let synced_at = now
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    json!({ "success": true, "session_id": session_id, "synced_at": synced_at })
}

pub async fn upsert_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(mut input): Json<ObservationSessionInput>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let session_id = input
        .session_id
        .take()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("session_id is required".to_string()))?;
    let now = OffsetDateTime::now_utc();

    tracing::info!(session_id = %session_id, status = %input.status.as_str(), observer_id = %auth_user.user_id(), "Syncing observation session");

    let written = write_session(
        &state,
        &upsert_sql(),
        &session_id,
        auth_user.user_id(),
        input,
        now,
    )
    .await?;
    // An existing session owned by another observer is left untouched
    if written == 0 {
        return Err(session_not_found());
    }

    Ok(Json(synced_body(&session_id, now)))
}

pub async fn update_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<String>,
    Json(input): Json<ObservationSessionInput>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let now = OffsetDateTime::now_utc();
    let written = write_session(
        &state,
        &update_sql(),
        &session_id,
        auth_user.user_id(),
        input,
        now,
    )
    .await?;
    if written == 0 {
        return Err(session_not_found());
    }

    tracing::info!(session_id = %session_id, observer_id = %auth_user.user_id(), "Observation session updated");
    Ok(Json(synced_body(&session_id, now)))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let deleted =
        sqlx::query("DELETE FROM observation_sessions WHERE session_id = $1 AND observer_id = $2")
            .bind(&session_id)
            .bind(auth_user.user_id())
            .execute(&state.pool)
            .await?
            .rows_affected();
    if deleted == 0 {
        return Err(session_not_found());
    }

    tracing::info!(session_id = %session_id, observer_id = %auth_user.user_id(), "Observation session deleted");
    Ok(Json(json!({ "success": true, "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reflection(id: &str) -> CoachReflectionRow {
        let now = OffsetDateTime::now_utc();
        CoachReflectionRow {
            reflection_id: id.to_string(),
            session_id: "session_1".to_string(),
            coach_id: "coach_1".to_string(),
            content: "Felt rushed in the second half".to_string(),
            self_assessment_rating: Some(3),
            strengths: None,
            areas_for_development: None,
            template_id: None,
            responses: SqlJson(json!({})),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_merge_appends_coach_reflection() {
        let mut entries = vec![json!({"id": "obs_1", "text": "observer note"})];
        merge_coach_reflection(&mut entries, &reflection("refl_1"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["source"], "coach");
    }

    #[test]
    fn test_merge_skips_duplicate_id() {
        let mut entries = vec![json!({"id": "refl_1", "text": "already synced"})];
        merge_coach_reflection(&mut entries, &reflection("refl_1"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["text"], "already synced");
    }

    #[test]
    fn test_input_defaults() {
        let input: ObservationSessionInput =
            serde_json::from_str(r#"{"session_id": "s1", "name": "Tuesday"}"#).unwrap();
        assert_eq!(input.observation_context, "training");
        assert_eq!(input.status, SessionStatus::Draft);
        assert!(input.events.is_empty());
        assert_eq!(input.total_duration, 0.0);
    }

    #[test]
    fn test_input_rejects_unknown_status() {
        let result = serde_json::from_str::<ObservationSessionInput>(
            r#"{"session_id": "s1", "name": "Tuesday", "status": "archived"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_upsert_sql_binds_every_column() {
        let sql = upsert_sql();
        assert!(sql.contains(&format!("${}", INPUT_COLUMNS.len() + 2)));
        assert!(!sql.contains(&format!("${}", INPUT_COLUMNS.len() + 3)));
        assert!(sql.contains("attachments = EXCLUDED.attachments"));
        assert!(!sql.contains("created_at"));
    }

    #[test]
    fn test_update_sql_is_owner_scoped() {
        let sql = update_sql();
        assert!(sql.starts_with("UPDATE observation_sessions SET name = $3"));
        assert!(sql.ends_with("WHERE session_id = $1 AND observer_id = $2"));
    }
}
