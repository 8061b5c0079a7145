//! Platform administration: organizations, seat invites, password resets
//! and impersonation

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use mcd_shared::{new_id, normalize_email, validate_email, validate_password, IdPrefix, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    auth::{
        clear_session_cookie, cookie_headers, generate_token, hash_password, revoke_all_sessions,
        session_cookie, store_session, AuthUser,
    },
    error::{ApiError, ApiResult},
    models::{InviteRow, OrganizationRow, UserResponse, UserRow, USER_COLUMNS},
    routes::invites::{self, InviteDraft, InviteResponse},
    state::AppState,
};

pub async fn check(Extension(auth_user): Extension<AuthUser>) -> Json<Value> {
    Json(json!({ "is_admin": auth_user.role() == Role::Admin }))
}

// =============================================================================
// Organizations
// =============================================================================

#[derive(Debug, FromRow, Serialize)]
pub struct OrganizationSummary {
    pub org_id: String,
    pub owner_id: String,
    pub club_name: Option<String>,
    pub club_logo: Option<String>,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub user_count: i64,
    pub coach_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub async fn list_organizations(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<OrganizationSummary>>> {
    auth_user.require_admin()?;

    let orgs = sqlx::query_as::<_, OrganizationSummary>(
        r#"
        SELECT o.org_id, o.owner_id, o.club_name, o.club_logo, o.created_at,
               u.name AS owner_name, u.email AS owner_email,
               (SELECT COUNT(*) FROM users m WHERE m.organization_id = o.org_id) AS user_count,
               (SELECT COUNT(*) FROM coaches c WHERE c.organization_id = o.org_id) AS coach_count
        FROM organizations o
        LEFT JOIN users u ON u.user_id = o.owner_id
        ORDER BY o.created_at DESC
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(orgs))
}

#[derive(Debug, Deserialize)]
pub struct OrganizationCreate {
    pub club_name: String,
    pub club_logo: Option<String>,
}

pub async fn create_organization(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<OrganizationCreate>,
) -> ApiResult<Json<OrganizationRow>> {
    auth_user.require_admin()?;

    let club_name = req.club_name.trim();
    if club_name.is_empty() {
        return Err(ApiError::BadRequest("Club name is required".to_string()));
    }

    let org = OrganizationRow::create(
        &state.pool,
        &new_id(IdPrefix::Organization),
        auth_user.user_id(),
        Some(club_name),
        req.club_logo.as_deref(),
    )
    .await?;

    tracing::info!(org_id = %org.org_id, created_by = %auth_user.user_id(), "Organization created");
    Ok(Json(org))
}

async fn require_org(state: &AppState, org_id: &str) -> ApiResult<OrganizationRow> {
    OrganizationRow::find_by_id(&state.pool, org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))
}

#[derive(Debug, Serialize)]
pub struct OrganizationMembers {
    pub organization: OrganizationRow,
    pub users: Vec<UserResponse>,
    pub pending_invites: Vec<InviteResponse>,
}

pub async fn organization_users(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(org_id): Path<String>,
) -> ApiResult<Json<OrganizationMembers>> {
    auth_user.require_admin()?;
    let organization = require_org(&state, &org_id).await?;

    let users = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE organization_id = $1 ORDER BY created_at ASC",
        USER_COLUMNS
    ))
    .bind(&org_id)
    .fetch_all(&state.pool)
    .await?;

    let pending = sqlx::query_as::<_, InviteRow>(&format!(
        "SELECT {} FROM invites WHERE organization_id = $1 AND used = FALSE \
         ORDER BY created_at DESC",
        crate::models::INVITE_COLUMNS
    ))
    .bind(&org_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(OrganizationMembers {
        organization,
        users: users.iter().map(UserResponse::from).collect(),
        pending_invites: pending.into_iter().map(InviteResponse::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct OrganizationUserCreate {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default = "default_member_role")]
    pub role: Role,
    /// Accepted for compatibility; the path parameter decides the organization
    pub organization_id: Option<String>,
}

fn default_member_role() -> Role {
    Role::CoachDeveloper
}

fn full_name(first: &str, last: &str) -> String {
    format!("{} {}", first.trim(), last.trim()).trim().to_string()
}

/// Invite someone into an organization, rejecting emails that already have an
/// account or a pending invite
async fn invite_member(
    state: &AppState,
    admin: &UserRow,
    org_id: &str,
    email: &str,
    role: Role,
    name: &str,
) -> ApiResult<InviteRow> {
    let email = normalize_email(email);
    if !validate_email(&email) {
        return Err(ApiError::BadRequest("Invalid email format".to_string()));
    }
    if UserRow::find_by_email(&state.pool, &email).await?.is_some() {
        return Err(ApiError::BadRequest(
            "A user with this email already exists".to_string(),
        ));
    }
    if InviteRow::find_pending_for_email(&state.pool, &email)
        .await?
        .is_some()
    {
        return Err(ApiError::BadRequest(
            "An invite already exists for this email address".to_string(),
        ));
    }

    let invitee_name = (!name.is_empty()).then_some(name);
    let invite = invites::create_and_send(
        state,
        admin,
        InviteDraft {
            email: &email,
            role,
            coach_id: None,
            organization_id: Some(org_id),
            invitee_name,
        },
    )
    .await?;

    tracing::info!(org_id = %org_id, email = %email, role = %role, "Organization member invited");
    Ok(invite)
}

pub async fn create_organization_user(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(org_id): Path<String>,
    Json(req): Json<OrganizationUserCreate>,
) -> ApiResult<Json<InviteResponse>> {
    auth_user.require_admin()?;
    require_org(&state, &org_id).await?;

    if let Some(body_org) = req.organization_id.as_deref() {
        if body_org != org_id {
            tracing::debug!(path_org = %org_id, body_org = %body_org, "Ignoring mismatched organization_id in body");
        }
    }

    let name = full_name(&req.first_name, &req.last_name);
    let invite = invite_member(&state, &auth_user.user, &org_id, &req.email, req.role, &name).await?;
    Ok(Json(invite.into()))
}

#[derive(Debug, Deserialize)]
pub struct CoachDeveloperCreate {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

pub async fn add_coach_developer(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(org_id): Path<String>,
    Json(req): Json<CoachDeveloperCreate>,
) -> ApiResult<Json<InviteResponse>> {
    auth_user.require_admin()?;
    require_org(&state, &org_id).await?;

    let invite = invite_member(
        &state,
        &auth_user.user,
        &org_id,
        &req.email,
        Role::CoachDeveloper,
        req.name.trim(),
    )
    .await?;
    Ok(Json(invite.into()))
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PasswordResetByAdmin {
    pub new_password: String,
}

pub async fn reset_user_password(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(req): Json<PasswordResetByAdmin>,
) -> ApiResult<Json<Value>> {
    auth_user.require_admin()?;
    validate_password(&req.new_password)?;

    if UserRow::find_by_id(&state.pool, &user_id).await?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let password_hash = hash_password(&req.new_password)?;
    sqlx::query(
        "UPDATE users SET password_hash = $1, auth_provider = 'email' WHERE user_id = $2",
    )
    .bind(&password_hash)
    .bind(&user_id)
    .execute(&state.pool)
    .await?;

    revoke_all_sessions(&state.pool, &user_id).await?;

    tracing::info!(user_id = %user_id, reset_by = %auth_user.user_id(), "Password reset by admin");
    Ok(Json(json!({ "status": "password_reset" })))
}

#[derive(Debug, Serialize)]
pub struct ImpersonationResponse {
    pub token: String,
    pub user: UserResponse,
    pub impersonated_by: String,
}

pub async fn impersonate(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> ApiResult<(HeaderMap, Json<ImpersonationResponse>)> {
    auth_user.require_admin()?;

    let target = UserRow::find_by_id(&state.pool, &user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    if target.role() == Role::Admin {
        return Err(ApiError::Forbidden(
            "Cannot impersonate another admin".to_string(),
        ));
    }

    let token = generate_token();
    store_session(
        &state.pool,
        &token,
        auth_user.user_id(),
        Some(&target.user_id),
        state.config.session_ttl_days,
    )
    .await?;

    tracing::warn!(admin_id = %auth_user.user_id(), target_id = %target.user_id, "Impersonation session started");

    let cookie = session_cookie(
        &token,
        state.config.session_ttl_days,
        state.config.cookie_secure,
    );
    Ok((
        cookie_headers(&cookie),
        Json(ImpersonationResponse {
            token,
            user: UserResponse::from(&target),
            impersonated_by: auth_user.user_id().to_string(),
        }),
    ))
}

pub async fn stop_impersonation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<(HeaderMap, Json<Value>)> {
    let Some(admin_id) = auth_user.impersonated_by.as_deref() else {
        return Err(ApiError::BadRequest(
            "Not currently impersonating".to_string(),
        ));
    };

    sqlx::query("DELETE FROM user_sessions WHERE token_hash = $1")
        .bind(&auth_user.token_hash)
        .execute(&state.pool)
        .await?;

    tracing::info!(admin_id = %admin_id, target_id = %auth_user.user_id(), "Impersonation session ended");

    Ok((
        cookie_headers(&clear_session_cookie(state.config.cookie_secure)),
        Json(super::status_body("impersonation_ended")),
    ))
}
