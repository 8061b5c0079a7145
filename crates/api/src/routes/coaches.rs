//! Coach profile management

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use mcd_shared::{new_id, normalize_email, validate_email, IdPrefix, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json as SqlJson, FromRow, PgPool};

use crate::{
    access,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::{
        CoachRow, InviteRow, ObservationRow, UserRow, COACH_COLUMNS, OBSERVATION_COLUMNS,
        USER_COLUMNS,
    },
    plans::{self, PlanInfo},
    routes::invites::{self, InviteDraft},
    state::AppState,
};

/// Give every coach account a profile: create one for accounts without a
/// link, recreate (same id) profiles that have gone missing
async fn sync_coach_accounts(pool: &PgPool) -> ApiResult<()> {
    let orphans = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE role = 'coach' AND (linked_coach_id IS NULL \
         OR NOT EXISTS (SELECT 1 FROM coaches c WHERE c.id = users.linked_coach_id)) LIMIT 200",
        USER_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    for user in orphans {
        let coach_id = user
            .linked_coach_id
            .clone()
            .unwrap_or_else(|| new_id(IdPrefix::Coach));

        sqlx::query(
            "INSERT INTO coaches (id, user_id, name, email, photo, organization_id, has_account, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)",
        )
        .bind(&coach_id)
        .bind(&user.user_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.picture)
        .bind(&user.organization_id)
        .bind(user.created_at)
        .execute(pool)
        .await?;

        if user.linked_coach_id.is_none() {
            sqlx::query("UPDATE users SET linked_coach_id = $1 WHERE user_id = $2")
                .bind(&coach_id)
                .bind(&user.user_id)
                .execute(pool)
                .await?;
            tracing::info!(coach_id = %coach_id, email = %user.email, "Auto-created coach profile for existing user");
        } else {
            tracing::info!(coach_id = %coach_id, email = %user.email, "Recreated missing coach profile");
        }
    }

    Ok(())
}

#[derive(Debug, FromRow)]
struct CoachWithAccount {
    #[sqlx(flatten)]
    coach: CoachRow,
    account_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CoachListItem {
    #[serde(flatten)]
    pub coach: CoachRow,
    #[serde(rename = "sessionCount")]
    pub session_count: i64,
    #[serde(rename = "upcomingCount")]
    pub upcoming_count: i64,
}

/// Completed and planned session counts per coach, in one grouped query
async fn session_counts(
    pool: &PgPool,
    coach_ids: &[String],
) -> ApiResult<HashMap<String, (i64, i64)>> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT coach_id, status, COUNT(*) FROM observation_sessions \
         WHERE coach_id = ANY($1) AND status IN ('completed', 'planned') \
         GROUP BY coach_id, status",
    )
    .bind(coach_ids)
    .fetch_all(pool)
    .await?;

    let mut counts: HashMap<String, (i64, i64)> = HashMap::new();
    for (coach_id, status, count) in rows {
        let entry = counts.entry(coach_id).or_default();
        if status == "completed" {
            entry.0 = count;
        } else {
            entry.1 = count;
        }
    }
    Ok(counts)
}

pub async fn list_coaches(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<CoachListItem>>> {
    auth_user.require_staff()?;

    sync_coach_accounts(&state.pool).await?;

    let rows = sqlx::query_as::<_, CoachWithAccount>(&format!(
        "SELECT {}, (SELECT u.email FROM users u WHERE u.user_id = coaches.user_id) AS account_email \
         FROM coaches ORDER BY created_at DESC LIMIT 200",
        COACH_COLUMNS
    ))
    .fetch_all(&state.pool)
    .await?;

    let coach_ids: Vec<String> = rows.iter().map(|r| r.coach.id.clone()).collect();
    let counts = session_counts(&state.pool, &coach_ids).await?;

    let coaches = rows
        .into_iter()
        .map(|row| {
            let mut coach = row.coach;
            coach.has_account = row.account_email.is_some();
            if let Some(email) = row.account_email {
                coach.email = Some(email);
            }
            let (session_count, upcoming_count) =
                counts.get(&coach.id).copied().unwrap_or_default();
            CoachListItem {
                coach,
                session_count,
                upcoming_count,
            }
        })
        .collect();

    Ok(Json(coaches))
}

#[derive(Debug, Deserialize)]
pub struct CoachCreate {
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub role_title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedCoach {
    #[serde(flatten)]
    pub coach: CoachRow,
    pub invite_sent: bool,
}

fn ensure_room_for_coach(plan: &PlanInfo, current: i64) -> ApiResult<()> {
    if plan.has_room_for_coach(current) {
        return Ok(());
    }
    Err(ApiError::Forbidden(format!(
        "Your {} plan allows up to {} coaches. Upgrade to add more.",
        plan.tier, plan.coaches_limit
    )))
}

/// Role of an existing account once a coach profile is linked to it; admins stay admins
fn linked_account_role(current: Role) -> Role {
    match current {
        Role::Admin => Role::Admin,
        _ => Role::Coach,
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_coach(
    pool: &PgPool,
    coach_id: &str,
    name: &str,
    email: &str,
    role_title: Option<&str>,
    account: Option<&UserRow>,
    organization_id: Option<&str>,
    created_by: &str,
) -> ApiResult<CoachRow> {
    let coach = sqlx::query_as::<_, CoachRow>(&format!(
        "INSERT INTO coaches (id, user_id, name, email, photo, role_title, organization_id, \
         created_by, has_account) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
        COACH_COLUMNS
    ))
    .bind(coach_id)
    .bind(account.map(|u| u.user_id.as_str()))
    .bind(name)
    .bind(email)
    .bind(account.and_then(|u| u.picture.as_deref()))
    .bind(role_title)
    .bind(organization_id)
    .bind(created_by)
    .bind(account.is_some())
    .fetch_one(pool)
    .await?;
    Ok(coach)
}

pub async fn create_coach(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CoachCreate>,
) -> ApiResult<Json<CreatedCoach>> {
    auth_user.require_staff()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Coach name is required".to_string()));
    }
    let email = req
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Coach email is required".to_string()))?;
    if !validate_email(&email) {
        return Err(ApiError::BadRequest("Invalid email format".to_string()));
    }
    let role_title = req
        .role_title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if CoachRow::find_by_email(&state.pool, &email).await?.is_some() {
        return Err(ApiError::BadRequest(format!(
            "A coach profile already exists for {}",
            email
        )));
    }

    let org_id = plans::billing_organization(&state.pool, &auth_user.user).await?;
    let plan = plans::organization_plan(&state.pool, &state.config, org_id.as_deref()).await?;
    let current = plans::coach_count(&state.pool, auth_user.user_id(), org_id.as_deref()).await?;
    ensure_room_for_coach(&plan, current)?;

    let coach_id = new_id(IdPrefix::Coach);

    if let Some(existing_user) = UserRow::find_by_email(&state.pool, &email).await? {
        let coach = insert_coach(
            &state.pool,
            &coach_id,
            name,
            &email,
            role_title,
            Some(&existing_user),
            org_id.as_deref(),
            auth_user.user_id(),
        )
        .await?;

        sqlx::query("UPDATE users SET linked_coach_id = $1, role = $2 WHERE user_id = $3")
            .bind(&coach_id)
            .bind(linked_account_role(existing_user.role()).as_str())
            .bind(&existing_user.user_id)
            .execute(&state.pool)
            .await?;

        tracing::info!(coach_id = %coach_id, email = %email, created_by = %auth_user.user_id(), "Coach profile created and linked to existing user");
        return Ok(Json(CreatedCoach {
            coach,
            invite_sent: false,
        }));
    }

    let coach = insert_coach(
        &state.pool,
        &coach_id,
        name,
        &email,
        role_title,
        None,
        org_id.as_deref(),
        auth_user.user_id(),
    )
    .await?;

    let mut invite_sent = false;
    if InviteRow::find_pending_for_email(&state.pool, &email)
        .await?
        .is_none()
    {
        let invite = invites::create_and_send(
            &state,
            &auth_user.user,
            InviteDraft {
                email: &email,
                role: Role::Coach,
                coach_id: Some(&coach_id),
                organization_id: org_id.as_deref(),
                invitee_name: Some(name),
            },
        )
        .await?;
        invite_sent = invite.email_sent == Some(true);
    }

    tracing::info!(coach_id = %coach_id, created_by = %auth_user.user_id(), invite_sent, "Coach profile created");
    Ok(Json(CreatedCoach { coach, invite_sent }))
}

async fn coach_detail(pool: &PgPool, coach_id: &str) -> ApiResult<CoachRow> {
    let mut coach = CoachRow::find_by_id(pool, coach_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coach not found".to_string()))?;

    coach.has_account = match &coach.user_id {
        Some(user_id) => UserRow::find_by_id(pool, user_id).await?.is_some(),
        None => false,
    };
    Ok(coach)
}

pub async fn get_coach(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(coach_id): Path<String>,
) -> ApiResult<Json<CoachRow>> {
    let coach = coach_detail(&state.pool, &coach_id).await?;
    if !access::can_view_coach(&auth_user.user, &coach_id) {
        return Err(ApiError::Forbidden("Access denied".to_string()));
    }
    Ok(Json(coach))
}

/// Observation session as listed on a coach's history page
#[derive(Debug, Serialize)]
pub struct CoachSessionItem {
    pub session_id: String,
    pub id: String,
    pub name: String,
    pub title: String,
    pub coach_id: Option<String>,
    pub observer_id: String,
    pub observer_name: Option<String>,
    pub observation_context: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(rename = "createdAt", with = "time::serde::rfc3339")]
    pub created_at_alias: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: time::OffsetDateTime,
    pub total_duration: f64,
    #[serde(rename = "totalDuration")]
    pub total_duration_alias: f64,
    pub events: Vec<Value>,
    pub event_count: usize,
    #[serde(rename = "sessionParts")]
    pub session_parts: Vec<Value>,
    #[serde(rename = "eventTypes")]
    pub event_types: Vec<Value>,
}

impl CoachSessionItem {
    fn new(session: ObservationRow, observer_name: Option<String>) -> Self {
        let event_count = session.event_count();
        Self {
            id: session.session_id.clone(),
            session_id: session.session_id,
            title: session.name.clone(),
            name: session.name,
            coach_id: session.coach_id,
            observer_id: session.observer_id,
            observer_name,
            observation_context: session.observation_context,
            status: session.status,
            created_at: session.created_at,
            created_at_alias: session.created_at,
            updated_at: session.updated_at,
            total_duration: session.total_duration,
            total_duration_alias: session.total_duration,
            events: session.events.0,
            event_count,
            session_parts: session.session_parts.0,
            event_types: session.intervention_types.0,
        }
    }
}

#[derive(Debug, FromRow)]
struct SessionWithObserver {
    #[sqlx(flatten)]
    session: ObservationRow,
    observer_name: Option<String>,
}

pub async fn coach_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(coach_id): Path<String>,
) -> ApiResult<Json<Vec<CoachSessionItem>>> {
    auth_user.require_staff()?;

    if CoachRow::find_by_id(&state.pool, &coach_id).await?.is_none() {
        return Err(ApiError::NotFound("Coach not found".to_string()));
    }

    let rows = sqlx::query_as::<_, SessionWithObserver>(&format!(
        "SELECT {}, (SELECT u.name FROM users u WHERE u.user_id = observation_sessions.observer_id) \
         AS observer_name FROM observation_sessions WHERE coach_id = $1 \
         ORDER BY updated_at DESC LIMIT 100",
        OBSERVATION_COLUMNS
    ))
    .bind(&coach_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|r| CoachSessionItem::new(r.session, r.observer_name))
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CoachUpdate {
    pub name: Option<String>,
    pub role_title: Option<String>,
    pub age_group: Option<String>,
    pub department: Option<String>,
    pub bio: Option<String>,
    pub targets: Option<Vec<Value>>,
}

pub async fn update_coach(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(coach_id): Path<String>,
    Json(req): Json<CoachUpdate>,
) -> ApiResult<Json<CoachRow>> {
    auth_user.require_staff()?;

    let updated = sqlx::query(
        "UPDATE coaches SET name = COALESCE($1, name), role_title = COALESCE($2, role_title), \
         age_group = COALESCE($3, age_group), department = COALESCE($4, department), \
         bio = COALESCE($5, bio), targets = COALESCE($6, targets), updated_at = NOW() \
         WHERE id = $7",
    )
    .bind(&req.name)
    .bind(&req.role_title)
    .bind(&req.age_group)
    .bind(&req.department)
    .bind(&req.bio)
    .bind(req.targets.map(SqlJson))
    .bind(&coach_id)
    .execute(&state.pool)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(ApiError::NotFound("Coach not found".to_string()));
    }

    tracing::info!(coach_id = %coach_id, updated_by = %auth_user.user_id(), "Coach updated");
    Ok(Json(coach_detail(&state.pool, &coach_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteCoachParams {
    #[serde(default)]
    pub delete_user: bool,
}

/// What happens to the account linked to a deleted coach profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountCleanup {
    Delete,
    /// Account survives as a coach developer
    Unlink,
}

fn account_cleanup(linked_user: Option<&str>, delete_user: bool) -> Option<AccountCleanup> {
    linked_user.map(|_| {
        if delete_user {
            AccountCleanup::Delete
        } else {
            AccountCleanup::Unlink
        }
    })
}

const UNLINK_ACCOUNT_SQL: &str =
    "UPDATE users SET linked_coach_id = NULL, role = 'coach_developer' WHERE user_id = $1";

/// Every invite tied to the profile, plus unused invites sent to its email
const DELETE_COACH_INVITES_SQL: &str = "DELETE FROM invites WHERE coach_id = $1 \
     OR ($2::TEXT IS NOT NULL AND LOWER(email) = $2 AND used = FALSE)";

fn invite_cleanup_email(coach_email: Option<&str>) -> Option<String> {
    coach_email.map(normalize_email).filter(|e| !e.is_empty())
}

pub async fn delete_coach(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(coach_id): Path<String>,
    Query(params): Query<DeleteCoachParams>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let coach = CoachRow::find_by_id(&state.pool, &coach_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coach not found".to_string()))?;

    let mut tx = state.pool.begin().await?;

    let cleanup = account_cleanup(coach.user_id.as_deref(), params.delete_user);
    if let (Some(cleanup), Some(user_id)) = (cleanup, coach.user_id.as_deref()) {
        match cleanup {
            AccountCleanup::Delete => {
                sqlx::query("DELETE FROM users WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                tracing::info!(user_id = %user_id, coach_id = %coach_id, "Deleted user account with coach");
            }
            AccountCleanup::Unlink => {
                sqlx::query(UNLINK_ACCOUNT_SQL)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
    }
    let user_deleted = cleanup == Some(AccountCleanup::Delete);

    let invites_deleted = sqlx::query(DELETE_COACH_INVITES_SQL)
        .bind(&coach_id)
        .bind(invite_cleanup_email(coach.email.as_deref()))
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if invites_deleted > 0 {
        tracing::info!(count = invites_deleted, coach_id = %coach_id, "Deleted invites for coach");
    }

    sqlx::query("DELETE FROM coaches WHERE id = $1")
        .bind(&coach_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(coach_id = %coach_id, deleted_by = %auth_user.user_id(), "Coach deleted");
    Ok(Json(serde_json::json!({
        "status": "deleted",
        "user_deleted": user_deleted,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_params_default_keeps_user() {
        let params: DeleteCoachParams = serde_json::from_str("{}").unwrap();
        assert!(!params.delete_user);
    }

    #[test]
    fn test_full_plan_refuses_new_coach() {
        let plan = plans::resolve_plan(false, None);
        assert!(ensure_room_for_coach(&plan, 4).is_ok());

        let err = ensure_room_for_coach(&plan, 5).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(
            err.to_string(),
            "Your individual plan allows up to 5 coaches. Upgrade to add more."
        );
    }

    #[test]
    fn test_bootstrapped_plan_has_room() {
        let plan = plans::resolve_plan(true, None);
        assert!(ensure_room_for_coach(&plan, 998).is_ok());
        assert!(ensure_room_for_coach(&plan, 999).is_err());
    }

    #[test]
    fn test_linking_keeps_admin_role() {
        assert_eq!(linked_account_role(Role::Admin), Role::Admin);
        assert_eq!(linked_account_role(Role::CoachDeveloper), Role::Coach);
        assert_eq!(linked_account_role(Role::Coach), Role::Coach);
    }

    #[test]
    fn test_delete_unlinks_account_by_default() {
        assert_eq!(
            account_cleanup(Some("user_1"), false),
            Some(AccountCleanup::Unlink)
        );
        assert_eq!(
            account_cleanup(Some("user_1"), true),
            Some(AccountCleanup::Delete)
        );
        assert_eq!(account_cleanup(None, true), None);
        assert!(UNLINK_ACCOUNT_SQL.contains("linked_coach_id = NULL"));
        assert!(UNLINK_ACCOUNT_SQL.contains("role = 'coach_developer'"));
    }

    #[test]
    fn test_delete_removes_profile_and_pending_email_invites() {
        assert!(DELETE_COACH_INVITES_SQL.contains("coach_id = $1"));
        assert!(DELETE_COACH_INVITES_SQL.contains("LOWER(email) = $2 AND used = FALSE"));
        assert_eq!(
            invite_cleanup_email(Some(" Sam@Club.COM ")).as_deref(),
            Some("sam@club.com")
        );
        assert_eq!(invite_cleanup_email(Some("  ")), None);
        assert_eq!(invite_cleanup_email(None), None);
    }

    #[test]
    fn test_coach_update_ignores_unknown_fields() {
        let update: CoachUpdate =
            serde_json::from_str(r#"{"name": "Sam", "email": "x@example.com", "photo": "p.png"}"#)
                .unwrap();
        assert_eq!(update.name.as_deref(), Some("Sam"));
        assert!(update.targets.is_none());
    }
}
