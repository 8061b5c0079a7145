//! Coach-facing portal: a coach's own profile, sessions, reflections and
//! analytics. Every handler resolves the caller's coach profile first.

use std::collections::{BTreeMap, HashSet};

use axum::{extract::State, Extension, Json};
use mcd_shared::{new_id, IdPrefix};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{types::Json as SqlJson, FromRow};
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    linking,
    models::{
        CoachReflectionRow, CoachRow, ObservationRow, COACH_COLUMNS, OBSERVATION_COLUMNS,
        REFLECTION_COLUMNS,
    },
    routes::scheduling::{ScheduledObservationItem, SCHEDULE_ITEM_QUERY},
    state::AppState,
};

const SUMMARY_PREVIEW_CHARS: usize = 150;

/// Linked profile id for a coach caller
async fn own_coach_id(state: &AppState, auth_user: &AuthUser) -> ApiResult<String> {
    auth_user.require_coach()?;
    linking::ensure_coach_profile(&state.pool, &auth_user.user).await
}

async fn own_profile(state: &AppState, coach_id: &str) -> ApiResult<CoachRow> {
    CoachRow::find_by_id(&state.pool, coach_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coach profile not found".to_string()))
}

#[derive(Debug, FromRow)]
struct SessionWithObserver {
    #[sqlx(flatten)]
    session: ObservationRow,
    observer_name: Option<String>,
}

async fn coach_sessions(
    state: &AppState,
    coach_id: &str,
    statuses: &[&str],
) -> ApiResult<Vec<SessionWithObserver>> {
    let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
    let rows = sqlx::query_as::<_, SessionWithObserver>(&format!(
        "SELECT {}, (SELECT u.name FROM users u WHERE u.user_id = observation_sessions.observer_id) \
         AS observer_name FROM observation_sessions \
         WHERE coach_id = $1 AND status = ANY($2) ORDER BY updated_at DESC LIMIT 200",
        OBSERVATION_COLUMNS
    ))
    .bind(coach_id)
    .bind(&statuses)
    .fetch_all(&state.pool)
    .await?;
    Ok(rows)
}

async fn reflected_session_ids(state: &AppState, coach_id: &str) -> ApiResult<HashSet<String>> {
    let ids: Vec<(String,)> =
        sqlx::query_as("SELECT session_id FROM coach_reflections WHERE coach_id = $1")
            .bind(coach_id)
            .fetch_all(&state.pool)
            .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

#[derive(Debug, Serialize)]
pub struct RecentSession {
    pub session_id: String,
    pub title: String,
    pub observer_name: Option<String>,
    pub start_time: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub event_count: usize,
    pub total_duration: f64,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub profile: CoachRow,
    pub targets: Vec<Value>,
    pub upcoming_observations: Vec<ScheduledObservationItem>,
    pub recent_session: Option<RecentSession>,
    pub has_pending_reflection: bool,
    pub pending_reflection_session_id: Option<String>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<DashboardResponse>> {
    let coach_id = own_coach_id(&state, &auth_user).await?;
    let profile = own_profile(&state, &coach_id).await?;

    let upcoming = sqlx::query_as::<_, ScheduledObservationItem>(&format!(
        "{} WHERE s.coach_id = $1 AND s.status = 'scheduled' \
         AND s.scheduled_date >= TO_CHAR(NOW(), 'YYYY-MM-DD') \
         ORDER BY s.scheduled_date ASC LIMIT 10",
        SCHEDULE_ITEM_QUERY
    ))
    .bind(&coach_id)
    .fetch_all(&state.pool)
    .await?;

    let completed = coach_sessions(&state, &coach_id, &["completed"]).await?;
    let reflected = reflected_session_ids(&state, &coach_id).await?;

    let pending_reflection_session_id = completed
        .iter()
        .find(|r| !reflected.contains(&r.session.session_id))
        .map(|r| r.session.session_id.clone());

    let recent_session = completed.into_iter().next().map(|r| RecentSession {
        event_count: r.session.event_count(),
        session_id: r.session.session_id,
        title: r.session.name,
        observer_name: r.observer_name,
        start_time: r.session.start_time,
        updated_at: r.session.updated_at,
        total_duration: r.session.total_duration,
    });

    Ok(Json(DashboardResponse {
        targets: profile.active_targets(),
        profile,
        upcoming_observations: upcoming,
        recent_session,
        has_pending_reflection: pending_reflection_session_id.is_some(),
        pending_reflection_session_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct CoachSessionSummary {
    pub session_id: String,
    pub title: String,
    pub status: String,
    pub observation_context: String,
    pub observer_name: Option<String>,
    pub planned_date: Option<String>,
    pub start_time: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub total_duration: f64,
    pub event_count: usize,
    pub has_reflection: bool,
    pub summary_preview: Option<String>,
}

/// First `SUMMARY_PREVIEW_CHARS` characters of an AI summary, with an
/// ellipsis when cut
pub(crate) fn summary_preview(summary: &str) -> Option<String> {
    let summary = summary.trim();
    if summary.is_empty() {
        return None;
    }
    if summary.chars().count() <= SUMMARY_PREVIEW_CHARS {
        return Some(summary.to_string());
    }
    let cut: String = summary.chars().take(SUMMARY_PREVIEW_CHARS).collect();
    Some(format!("{}...", cut))
}

pub async fn sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<CoachSessionSummary>>> {
    let coach_id = own_coach_id(&state, &auth_user).await?;
    let rows = coach_sessions(&state, &coach_id, &["completed", "planned"]).await?;
    let reflected = reflected_session_ids(&state, &coach_id).await?;

    let sessions = rows
        .into_iter()
        .map(|r| {
            let s = r.session;
            CoachSessionSummary {
                has_reflection: reflected.contains(&s.session_id),
                summary_preview: summary_preview(&s.ai_summary),
                event_count: s.events.0.len(),
                session_id: s.session_id,
                title: s.name,
                status: s.status,
                observation_context: s.observation_context,
                observer_name: r.observer_name,
                planned_date: s.planned_date,
                start_time: s.start_time,
                created_at: s.created_at,
                updated_at: s.updated_at,
                total_duration: s.total_duration,
            }
        })
        .collect();

    Ok(Json(sessions))
}

pub async fn list_reflections(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<CoachReflectionRow>>> {
    let coach_id = own_coach_id(&state, &auth_user).await?;

    let reflections = sqlx::query_as::<_, CoachReflectionRow>(&format!(
        "SELECT {} FROM coach_reflections WHERE coach_id = $1 ORDER BY updated_at DESC",
        REFLECTION_COLUMNS
    ))
    .bind(&coach_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(reflections))
}

#[derive(Debug, Deserialize)]
pub struct ReflectionInput {
    pub session_id: String,
    #[serde(default, alias = "reflection")]
    pub content: String,
    #[serde(alias = "self_rating")]
    pub self_assessment_rating: Option<i32>,
    #[serde(alias = "what_went_well")]
    pub strengths: Option<String>,
    pub areas_for_development: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub responses: Option<Value>,
}

pub async fn save_reflection(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ReflectionInput>,
) -> ApiResult<Json<CoachReflectionRow>> {
    let coach_id = own_coach_id(&state, &auth_user).await?;

    if let Some(rating) = req.self_assessment_rating {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::BadRequest(
                "self_assessment_rating must be between 1 and 5".to_string(),
            ));
        }
    }

    let owns_session: Option<(String,)> = sqlx::query_as(
        "SELECT session_id FROM observation_sessions WHERE session_id = $1 AND coach_id = $2",
    )
    .bind(&req.session_id)
    .bind(&coach_id)
    .fetch_optional(&state.pool)
    .await?;
    if owns_session.is_none() {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }

    let reflection = sqlx::query_as::<_, CoachReflectionRow>(&format!(
        "INSERT INTO coach_reflections (reflection_id, session_id, coach_id, content, \
         self_assessment_rating, strengths, areas_for_development, template_id, responses) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (session_id, coach_id) DO UPDATE SET content = EXCLUDED.content, \
         self_assessment_rating = EXCLUDED.self_assessment_rating, strengths = EXCLUDED.strengths, \
         areas_for_development = EXCLUDED.areas_for_development, \
         template_id = EXCLUDED.template_id, responses = EXCLUDED.responses, updated_at = NOW() \
         RETURNING {}",
        REFLECTION_COLUMNS
    ))
    .bind(new_id(IdPrefix::Reflection))
    .bind(&req.session_id)
    .bind(&coach_id)
    .bind(&req.content)
    .bind(req.self_assessment_rating)
    .bind(&req.strengths)
    .bind(&req.areas_for_development)
    .bind(&req.template_id)
    .bind(SqlJson(req.responses.unwrap_or_else(|| json!({}))))
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(session_id = %req.session_id, coach_id = %coach_id, "Coach reflection saved");
    Ok(Json(reflection))
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub photo: Option<String>,
    pub role_title: Option<String>,
    pub age_group: Option<String>,
    pub department: Option<String>,
    pub bio: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ProfileUpdate>,
) -> ApiResult<Json<CoachRow>> {
    let coach_id = own_coach_id(&state, &auth_user).await?;

    let profile = sqlx::query_as::<_, CoachRow>(&format!(
        "UPDATE coaches SET photo = COALESCE($1, photo), role_title = COALESCE($2, role_title), \
         age_group = COALESCE($3, age_group), department = COALESCE($4, department), \
         bio = COALESCE($5, bio), updated_at = NOW() WHERE id = $6 RETURNING {}",
        COACH_COLUMNS
    ))
    .bind(&req.photo)
    .bind(&req.role_title)
    .bind(&req.age_group)
    .bind(&req.department)
    .bind(&req.bio)
    .bind(&coach_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Coach profile not found".to_string()))?;

    tracing::info!(coach_id = %coach_id, user_id = %auth_user.user_id(), "Coach profile updated");
    Ok(Json(profile))
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct CoachAnalytics {
    pub total_sessions: usize,
    pub total_interventions: usize,
    pub intervention_breakdown: BTreeMap<String, u64>,
    pub avg_ball_rolling_pct: f64,
    pub sessions_by_month: BTreeMap<String, u64>,
}

fn event_type_name(event: &Value) -> String {
    ["eventTypeName", "eventType", "type"]
        .iter()
        .find_map(|key| event.get(*key).and_then(Value::as_str))
        .unwrap_or("Unknown")
        .to_string()
}

/// Aggregate completed sessions into the analytics view
pub fn compute_analytics(sessions: &[ObservationRow]) -> CoachAnalytics {
    let mut analytics = CoachAnalytics {
        total_sessions: sessions.len(),
        ..Default::default()
    };

    let mut timed_sessions = 0u32;
    let mut pct_total = 0.0;

    for session in sessions {
        analytics.total_interventions += session.event_count();
        for event in &session.events.0 {
            *analytics
                .intervention_breakdown
                .entry(event_type_name(event))
                .or_default() += 1;
        }

        if session.ball_rolling_time + session.ball_not_rolling_time > 0.0 {
            timed_sessions += 1;
            pct_total += session.ball_rolling_pct();
        }

        let month = format!(
            "{:04}-{:02}",
            session.created_at.year(),
            u8::from(session.created_at.month())
        );
        *analytics.sessions_by_month.entry(month).or_default() += 1;
    }

    if timed_sessions > 0 {
        let avg = pct_total / f64::from(timed_sessions);
        analytics.avg_ball_rolling_pct = (avg * 10.0).round() / 10.0;
    }

    analytics
}

pub async fn analytics(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<CoachAnalytics>> {
    let coach_id = own_coach_id(&state, &auth_user).await?;

    let sessions = sqlx::query_as::<_, ObservationRow>(&format!(
        "SELECT {} FROM observation_sessions WHERE coach_id = $1 AND status = 'completed'",
        OBSERVATION_COLUMNS
    ))
    .bind(&coach_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(compute_analytics(&sessions)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn session(events: Vec<Value>, rolling: f64, not_rolling: f64, at: OffsetDateTime) -> ObservationRow {
        ObservationRow {
            session_id: new_id(IdPrefix::Reflection),
            name: "Session".to_string(),
            coach_id: Some("coach_1".to_string()),
            observer_id: "user_a".to_string(),
            observation_context: "training".to_string(),
            status: "completed".to_string(),
            planned_date: None,
            intervention_types: SqlJson(vec![]),
            descriptor_group1: None,
            descriptor_group2: None,
            session_parts: SqlJson(vec![]),
            start_time: None,
            end_time: None,
            total_duration: rolling + not_rolling,
            ball_rolling_time: rolling,
            ball_not_rolling_time: not_rolling,
            ball_rolling: false,
            active_part_id: None,
            events: SqlJson(events),
            ball_rolling_log: SqlJson(vec![]),
            observer_reflections: SqlJson(vec![]),
            coach_reflections: SqlJson(vec![]),
            session_notes: String::new(),
            ai_summary: String::new(),
            attachments: SqlJson(vec![]),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_analytics_empty() {
        assert_eq!(compute_analytics(&[]), CoachAnalytics::default());
    }

    #[test]
    fn test_analytics_aggregates_sessions() {
        let sessions = vec![
            session(
                vec![
                    json!({"eventTypeName": "Command"}),
                    json!({"eventTypeName": "Q&A"}),
                    json!({"eventTypeName": "Command"}),
                ],
                60.0,
                40.0,
                datetime!(2026-03-02 10:00 UTC),
            ),
            session(
                vec![json!({"eventType": "Guided Discovery"})],
                80.0,
                20.0,
                datetime!(2026-03-20 10:00 UTC),
            ),
            session(vec![json!({})], 0.0, 0.0, datetime!(2026-04-01 10:00 UTC)),
        ];

        let analytics = compute_analytics(&sessions);
        assert_eq!(analytics.total_sessions, 3);
        assert_eq!(analytics.total_interventions, 5);
        assert_eq!(analytics.intervention_breakdown["Command"], 2);
        assert_eq!(analytics.intervention_breakdown["Guided Discovery"], 1);
        assert_eq!(analytics.intervention_breakdown["Unknown"], 1);
        // untimed sessions do not drag the average down
        assert_eq!(analytics.avg_ball_rolling_pct, 70.0);
        assert_eq!(analytics.sessions_by_month["2026-03"], 2);
        assert_eq!(analytics.sessions_by_month["2026-04"], 1);
    }

    #[test]
    fn test_summary_preview() {
        assert_eq!(summary_preview("   "), None);
        assert_eq!(summary_preview("Short.").as_deref(), Some("Short."));

        let long = "a".repeat(200);
        let preview = summary_preview(&long).unwrap();
        assert_eq!(preview.len(), SUMMARY_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_reflection_input_accepts_app_field_names() {
        let input: ReflectionInput = serde_json::from_str(
            r#"{"session_id": "s1", "reflection": "Good", "self_rating": 4, "what_went_well": "Energy"}"#,
        )
        .unwrap();
        assert_eq!(input.content, "Good");
        assert_eq!(input.self_assessment_rating, Some(4));
        assert_eq!(input.strengths.as_deref(), Some("Energy"));
    }
}
