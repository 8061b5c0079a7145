//! Row types shared by several route modules

use mcd_shared::Role;
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

pub const USER_COLUMNS: &str = "user_id, email, name, picture, role, linked_coach_id, \
     organization_id, password_hash, auth_provider, marketing_opt_in, created_at";

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub role: String,
    pub linked_coach_id: Option<String>,
    pub organization_id: Option<String>,
    pub password_hash: Option<String>,
    pub auth_provider: String,
    pub marketing_opt_in: bool,
    pub created_at: OffsetDateTime,
}

impl UserRow {
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_default()
    }

    pub async fn find_by_id(pool: &PgPool, user_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE user_id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Case-insensitive lookup
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

/// Public view of a user account
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub role: String,
    pub linked_coach_id: Option<String>,
    pub organization_id: Option<String>,
    pub auth_provider: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&UserRow> for UserResponse {
    fn from(user: &UserRow) -> Self {
        Self {
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            picture: user.picture.clone(),
            role: user.role.clone(),
            linked_coach_id: user.linked_coach_id.clone(),
            organization_id: user.organization_id.clone(),
            auth_provider: user.auth_provider.clone(),
            created_at: user.created_at,
        }
    }
}

pub const COACH_COLUMNS: &str = "id, user_id, name, email, photo, role_title, age_group, \
     department, bio, targets, organization_id, created_by, has_account, created_at, updated_at";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CoachRow {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub role_title: Option<String>,
    pub age_group: Option<String>,
    pub department: Option<String>,
    pub bio: Option<String>,
    pub targets: Json<Vec<Value>>,
    pub organization_id: Option<String>,
    pub created_by: Option<String>,
    pub has_account: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CoachRow {
    pub async fn find_by_id(pool: &PgPool, coach_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CoachRow>(&format!(
            "SELECT {} FROM coaches WHERE id = $1",
            COACH_COLUMNS
        ))
        .bind(coach_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CoachRow>(&format!(
            "SELECT {} FROM coaches WHERE LOWER(email) = LOWER($1) ORDER BY created_at LIMIT 1",
            COACH_COLUMNS
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    /// Targets still being worked on
    pub fn active_targets(&self) -> Vec<Value> {
        self.targets
            .0
            .iter()
            .filter(|t| t.get("status").and_then(Value::as_str) == Some("active"))
            .cloned()
            .collect()
    }
}

pub const INVITE_COLUMNS: &str = "invite_id, email, role, coach_id, organization_id, invited_by, \
     used, used_at, email_sent, email_error, created_at";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InviteRow {
    pub invite_id: String,
    pub email: String,
    pub role: String,
    pub coach_id: Option<String>,
    pub organization_id: Option<String>,
    pub invited_by: String,
    pub used: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub used_at: Option<OffsetDateTime>,
    pub email_sent: Option<bool>,
    pub email_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl InviteRow {
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_default()
    }

    pub async fn find_by_id(pool: &PgPool, invite_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {} FROM invites WHERE invite_id = $1",
            INVITE_COLUMNS
        ))
        .bind(invite_id)
        .fetch_optional(pool)
        .await
    }

    /// Most recent unused invite for an email address
    pub async fn find_pending_for_email(
        pool: &PgPool,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {} FROM invites WHERE email = LOWER($1) AND used = FALSE \
             ORDER BY created_at DESC LIMIT 1",
            INVITE_COLUMNS
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }
}

pub const ORGANIZATION_COLUMNS: &str =
    "org_id, owner_id, club_name, club_logo, created_at, updated_at";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrganizationRow {
    pub org_id: String,
    pub owner_id: String,
    pub club_name: Option<String>,
    pub club_logo: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl OrganizationRow {
    pub async fn find_by_id(pool: &PgPool, org_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrganizationRow>(&format!(
            "SELECT {} FROM organizations WHERE org_id = $1",
            ORGANIZATION_COLUMNS
        ))
        .bind(org_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_owner(pool: &PgPool, owner_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrganizationRow>(&format!(
            "SELECT {} FROM organizations WHERE owner_id = $1 ORDER BY created_at LIMIT 1",
            ORGANIZATION_COLUMNS
        ))
        .bind(owner_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &PgPool,
        org_id: &str,
        owner_id: &str,
        club_name: Option<&str>,
        club_logo: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, OrganizationRow>(&format!(
            "INSERT INTO organizations (org_id, owner_id, club_name, club_logo) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            ORGANIZATION_COLUMNS
        ))
        .bind(org_id)
        .bind(owner_id)
        .bind(club_name)
        .bind(club_logo)
        .fetch_one(pool)
        .await
    }
}

pub const OBSERVATION_COLUMNS: &str = "session_id, name, coach_id, observer_id, \
     observation_context, status, planned_date, intervention_types, descriptor_group1, \
     descriptor_group2, session_parts, start_time, end_time, total_duration, ball_rolling_time, \
     ball_not_rolling_time, ball_rolling, active_part_id, events, ball_rolling_log, \
     observer_reflections, coach_reflections, session_notes, ai_summary, attachments, \
     created_at, updated_at";

/// Stored observation session
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ObservationRow {
    pub session_id: String,
    pub name: String,
    pub coach_id: Option<String>,
    pub observer_id: String,
    pub observation_context: String,
    pub status: String,
    pub planned_date: Option<String>,
    pub intervention_types: Json<Vec<Value>>,
    pub descriptor_group1: Option<Json<Value>>,
    pub descriptor_group2: Option<Json<Value>>,
    pub session_parts: Json<Vec<Value>>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub total_duration: f64,
    pub ball_rolling_time: f64,
    pub ball_not_rolling_time: f64,
    pub ball_rolling: bool,
    pub active_part_id: Option<String>,
    pub events: Json<Vec<Value>>,
    pub ball_rolling_log: Json<Vec<Value>>,
    pub observer_reflections: Json<Vec<Value>>,
    pub coach_reflections: Json<Vec<Value>>,
    pub session_notes: String,
    pub ai_summary: String,
    pub attachments: Json<Vec<Value>>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ObservationRow {
    pub async fn find_by_id(pool: &PgPool, session_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ObservationRow>(&format!(
            "SELECT {} FROM observation_sessions WHERE session_id = $1",
            OBSERVATION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(pool)
        .await
    }

    pub fn event_count(&self) -> usize {
        self.events.0.len()
    }

    /// Ball-in-play share of the timed session, 0 when nothing was timed
    pub fn ball_rolling_pct(&self) -> f64 {
        let timed = self.ball_rolling_time + self.ball_not_rolling_time;
        if timed > 0.0 {
            self.ball_rolling_time / timed * 100.0
        } else {
            0.0
        }
    }
}

pub const REFLECTION_COLUMNS: &str = "reflection_id, session_id, coach_id, content, \
     self_assessment_rating, strengths, areas_for_development, template_id, responses, \
     created_at, updated_at";

/// Reflection a coach wrote about one of their sessions
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CoachReflectionRow {
    pub reflection_id: String,
    pub session_id: String,
    pub coach_id: String,
    pub content: String,
    pub self_assessment_rating: Option<i32>,
    pub strengths: Option<String>,
    pub areas_for_development: Option<String>,
    pub template_id: Option<String>,
    pub responses: Json<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CoachReflectionRow {
    pub async fn find_for_session(
        pool: &PgPool,
        session_id: &str,
        coach_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CoachReflectionRow>(&format!(
            "SELECT {} FROM coach_reflections WHERE session_id = $1 AND coach_id = $2",
            REFLECTION_COLUMNS
        ))
        .bind(session_id)
        .bind(coach_id)
        .fetch_optional(pool)
        .await
    }

    /// Shape used inside an observation session's `coach_reflections` list
    pub fn as_session_entry(&self) -> Value {
        let timestamp = self
            .updated_at
            .format(&time::format_description::well_known::Rfc3339)
            .ok();
        serde_json::json!({
            "id": self.reflection_id,
            "text": self.content,
            "rating": self.self_assessment_rating,
            "what_went_well": self.strengths.clone().unwrap_or_default(),
            "areas_for_development": self.areas_for_development.clone().unwrap_or_default(),
            "responses": self.responses.0,
            "timestamp": timestamp,
            "source": "coach",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation(events: Vec<Value>) -> ObservationRow {
        let now = OffsetDateTime::now_utc();
        ObservationRow {
            session_id: "session_1".to_string(),
            name: "U12 Training".to_string(),
            coach_id: Some("coach_1".to_string()),
            observer_id: "user_a".to_string(),
            observation_context: "training".to_string(),
            status: "completed".to_string(),
            planned_date: None,
            intervention_types: Json(vec![]),
            descriptor_group1: None,
            descriptor_group2: None,
            session_parts: Json(vec![]),
            start_time: None,
            end_time: None,
            total_duration: 3600.0,
            ball_rolling_time: 0.0,
            ball_not_rolling_time: 0.0,
            ball_rolling: false,
            active_part_id: None,
            events: Json(events),
            ball_rolling_log: Json(vec![]),
            observer_reflections: Json(vec![]),
            coach_reflections: Json(vec![]),
            session_notes: String::new(),
            ai_summary: String::new(),
            attachments: Json(vec![]),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_ball_rolling_pct() {
        let mut session = observation(vec![]);
        assert_eq!(session.ball_rolling_pct(), 0.0);

        session.ball_rolling_time = 30.0;
        session.ball_not_rolling_time = 90.0;
        assert!((session.ball_rolling_pct() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_event_count() {
        let session = observation(vec![json!({"id": "e1"}), json!({"id": "e2"})]);
        assert_eq!(session.event_count(), 2);
    }

    #[test]
    fn test_reflection_session_entry_is_marked_as_coach() {
        let now = OffsetDateTime::now_utc();
        let reflection = CoachReflectionRow {
            reflection_id: "refl_1".to_string(),
            session_id: "session_1".to_string(),
            coach_id: "coach_1".to_string(),
            content: "Went well".to_string(),
            self_assessment_rating: Some(4),
            strengths: Some("Clear demos".to_string()),
            areas_for_development: None,
            template_id: None,
            responses: Json(json!({})),
            created_at: now,
            updated_at: now,
        };

        let entry = reflection.as_session_entry();
        assert_eq!(entry["id"], "refl_1");
        assert_eq!(entry["source"], "coach");
        assert_eq!(entry["rating"], 4);
        assert_eq!(entry["what_went_well"], "Clear demos");
        assert_eq!(entry["areas_for_development"], "");
    }
}
