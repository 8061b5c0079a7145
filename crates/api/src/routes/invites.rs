//! Invitations

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use mcd_shared::{new_id, normalize_email, IdPrefix, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    access,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::{CoachRow, InviteRow, UserRow, INVITE_COLUMNS},
    routes::organization,
    state::AppState,
};

/// Parameters for a new invite
pub(crate) struct InviteDraft<'a> {
    pub email: &'a str,
    pub role: Role,
    pub coach_id: Option<&'a str>,
    pub organization_id: Option<&'a str>,
    pub invitee_name: Option<&'a str>,
}

/// Insert an invite and email it, recording the delivery outcome on the row
pub(crate) async fn create_and_send(
    state: &AppState,
    inviter: &UserRow,
    draft: InviteDraft<'_>,
) -> ApiResult<InviteRow> {
    let invite_id = new_id(IdPrefix::Invite);

    let invite = sqlx::query_as::<_, InviteRow>(&format!(
        "INSERT INTO invites (invite_id, email, role, coach_id, organization_id, invited_by) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
        INVITE_COLUMNS
    ))
    .bind(&invite_id)
    .bind(draft.email)
    .bind(draft.role.as_str())
    .bind(draft.coach_id)
    .bind(draft.organization_id)
    .bind(&inviter.user_id)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(invite_id = %invite_id, email = %draft.email, invited_by = %inviter.user_id, "Invite created");

    let outcome = state
        .email
        .send_invite(
            draft.email,
            &inviter.name,
            draft.role,
            &invite_id,
            draft.invitee_name,
        )
        .await;

    let invite = match outcome {
        Ok(_) => {
            sqlx::query_as::<_, InviteRow>(&format!(
                "UPDATE invites SET email_sent = TRUE, email_error = NULL, email_sent_at = NOW() \
                 WHERE invite_id = $1 RETURNING {}",
                INVITE_COLUMNS
            ))
            .bind(&invite_id)
            .fetch_one(&state.pool)
            .await?
        }
        Err(e) => {
            tracing::error!(invite_id = %invite_id, error = %e, "Failed to send invite email");
            sqlx::query_as::<_, InviteRow>(&format!(
                "UPDATE invites SET email_sent = FALSE, email_error = $2 \
                 WHERE invite_id = $1 RETURNING {}",
                INVITE_COLUMNS
            ))
            .bind(&invite_id)
            .bind(e.to_string())
            .fetch_one(&state.pool)
            .await?
        }
    };

    Ok(invite)
}

async fn invitee_name(state: &AppState, invite: &InviteRow) -> ApiResult<Option<String>> {
    match &invite.coach_id {
        Some(coach_id) => Ok(CoachRow::find_by_id(&state.pool, coach_id)
            .await?
            .map(|c| c.name)),
        None => Ok(None),
    }
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub invite_id: String,
    pub email: String,
    pub role: String,
    pub coach_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    pub email_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
}

impl From<InviteRow> for InviteResponse {
    fn from(invite: InviteRow) -> Self {
        Self {
            invite_id: invite.invite_id,
            email: invite.email,
            role: invite.role,
            coach_id: invite.coach_id,
            created_at: invite.created_at,
            email_sent: invite.email_sent,
            email_error: invite.email_error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InviteCreate {
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub coach_id: Option<String>,
}

fn default_role() -> String {
    Role::Coach.as_str().to_string()
}

pub async fn create_invite(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<InviteCreate>,
) -> ApiResult<Json<InviteResponse>> {
    auth_user.require_staff()?;

    let email = normalize_email(&req.email);
    let role = access::assignable_role(&req.role)?;

    if InviteRow::find_pending_for_email(&state.pool, &email)
        .await?
        .is_some()
    {
        return Err(ApiError::BadRequest(
            "An invite already exists for this email address".to_string(),
        ));
    }
    if UserRow::find_by_email(&state.pool, &email).await?.is_some() {
        return Err(ApiError::BadRequest(
            "A user with this email already exists".to_string(),
        ));
    }

    let org_id = organization::resolve_for_user(&state.pool, &auth_user.user)
        .await?
        .map(|org| org.org_id);

    let invite = create_and_send(
        &state,
        &auth_user.user,
        InviteDraft {
            email: &email,
            role,
            coach_id: req.coach_id.as_deref(),
            organization_id: org_id.as_deref(),
            invitee_name: None,
        },
    )
    .await?;

    Ok(Json(invite.into()))
}

pub async fn list_invites(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<InviteResponse>>> {
    auth_user.require_staff()?;

    let invites = sqlx::query_as::<_, InviteRow>(&format!(
        "SELECT {} FROM invites WHERE used = FALSE ORDER BY created_at DESC LIMIT 100",
        INVITE_COLUMNS
    ))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(invites.into_iter().map(Into::into).collect()))
}

pub async fn delete_invite(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(invite_id): Path<String>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let deleted = sqlx::query("DELETE FROM invites WHERE invite_id = $1")
        .bind(&invite_id)
        .execute(&state.pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound("Invite not found".to_string()));
    }

    Ok(Json(super::status_body("deleted")))
}

pub async fn delete_invites_by_email(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(email): Path<String>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let deleted = sqlx::query("DELETE FROM invites WHERE LOWER(email) = $1")
        .bind(normalize_email(&email))
        .execute(&state.pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound(
            "No invite found for this email".to_string(),
        ));
    }

    Ok(Json(json!({ "status": "deleted", "count": deleted })))
}

pub async fn resend_invite(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(invite_id): Path<String>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let invite = InviteRow::find_by_id(&state.pool, &invite_id)
        .await?
        .filter(|i| !i.used)
        .ok_or_else(|| ApiError::NotFound("Invite not found or already used".to_string()))?;

    let name = invitee_name(&state, &invite).await?;

    match state
        .email
        .send_invite(
            &invite.email,
            &auth_user.user.name,
            invite.role(),
            &invite.invite_id,
            name.as_deref(),
        )
        .await
    {
        Ok(_) => {
            sqlx::query(
                "UPDATE invites SET email_sent = TRUE, email_error = NULL, email_sent_at = NOW() \
                 WHERE invite_id = $1",
            )
            .bind(&invite.invite_id)
            .execute(&state.pool)
            .await?;
            Ok(Json(json!({ "status": "sent", "email": invite.email })))
        }
        Err(e) => {
            tracing::error!(invite_id = %invite.invite_id, error = %e, "Failed to resend invite email");
            Err(ApiError::ExternalService(format!("Email failed: {}", e)))
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct InviteValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InviteValidationResponse {
    fn invalid(error: &str) -> Self {
        Self {
            valid: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

pub async fn validate_invite(
    State(state): State<AppState>,
    Path(invite_id): Path<String>,
) -> ApiResult<Json<InviteValidationResponse>> {
    let Some(invite) = InviteRow::find_by_id(&state.pool, &invite_id).await? else {
        return Ok(Json(InviteValidationResponse::invalid("Invite not found")));
    };
    if invite.used {
        return Ok(Json(InviteValidationResponse::invalid(
            "This invitation has already been used",
        )));
    }

    let name = invitee_name(&state, &invite).await?;
    Ok(Json(InviteValidationResponse {
        valid: true,
        email: Some(invite.email),
        name,
        role: Some(invite.role),
        error: None,
    }))
}
