//! Organization (club) routes

use axum::{extract::State, Extension, Json};
use mcd_shared::{new_id, IdPrefix};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{
    access::{self, InviterOrg, OrgLookup},
    auth::AuthUser,
    error::ApiResult,
    models::{CoachRow, InviteRow, OrganizationRow, UserRow, ORGANIZATION_COLUMNS},
    plans::{self, PlanInfo},
    state::AppState,
};

#[derive(Debug, Default, Serialize)]
pub struct OrganizationResponse {
    pub org_id: Option<String>,
    pub club_name: Option<String>,
    pub club_logo: Option<String>,
    pub owner_id: Option<String>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<time::OffsetDateTime>,
}

impl From<OrganizationRow> for OrganizationResponse {
    fn from(org: OrganizationRow) -> Self {
        Self {
            org_id: Some(org.org_id),
            club_name: org.club_name,
            club_logo: org.club_logo,
            owner_id: Some(org.owner_id),
            created_at: Some(org.created_at),
        }
    }
}

/// Organization owned by `owner_id`, created empty when missing
pub(crate) async fn find_or_create_owned(
    pool: &PgPool,
    owner_id: &str,
) -> ApiResult<OrganizationRow> {
    if let Some(org) = OrganizationRow::find_by_owner(pool, owner_id).await? {
        return Ok(org);
    }
    let org = OrganizationRow::create(pool, &new_id(IdPrefix::Organization), owner_id, None, None)
        .await?;
    tracing::info!(org_id = %org.org_id, owner_id = %owner_id, "Created organization");
    Ok(org)
}

/// Organization a user belongs to, following the access lookup order
pub(crate) async fn resolve_for_user(
    pool: &PgPool,
    user: &UserRow,
) -> ApiResult<Option<OrganizationRow>> {
    for lookup in access::organization_lookup_order(user) {
        let found = match lookup {
            OrgLookup::Direct(org_id) => OrganizationRow::find_by_id(pool, &org_id).await?,
            OrgLookup::Owned(owner_id) => Some(find_or_create_owned(pool, &owner_id).await?),
            OrgLookup::ViaCoachProfile(coach_id) => {
                match CoachRow::find_by_id(pool, &coach_id).await? {
                    Some(coach) => via_coach_profile(pool, &coach).await?,
                    None => None,
                }
            }
        };
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

async fn via_coach_profile(pool: &PgPool, coach: &CoachRow) -> ApiResult<Option<OrganizationRow>> {
    if let Some(org_id) = &coach.organization_id {
        if let Some(org) = OrganizationRow::find_by_id(pool, org_id).await? {
            return Ok(Some(org));
        }
    }
    match &coach.created_by {
        Some(creator) => Ok(OrganizationRow::find_by_owner(pool, creator).await?),
        None => Ok(None),
    }
}

/// Organization a new account joins when registering from `invite`
pub(crate) async fn inviter_org_id(pool: &PgPool, invite: &InviteRow) -> ApiResult<Option<String>> {
    let inviter = UserRow::find_by_id(pool, &invite.invited_by).await?;
    Ok(match access::inviter_organization(inviter.as_ref(), invite) {
        InviterOrg::Org(org_id) => Some(org_id),
        InviterOrg::OwnedBy(owner_id) => OrganizationRow::find_by_owner(pool, &owner_id)
            .await?
            .map(|org| org.org_id),
        InviterOrg::None => None,
    })
}

pub async fn get_organization(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<OrganizationResponse>> {
    let org = resolve_for_user(&state.pool, &auth_user.user).await?;
    Ok(Json(org.map(Into::into).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct OrganizationUpdate {
    pub club_name: Option<String>,
    pub club_logo: Option<String>,
}

pub async fn update_organization(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<OrganizationUpdate>,
) -> ApiResult<Json<OrganizationResponse>> {
    auth_user.require_staff()?;

    let org = find_or_create_owned(&state.pool, auth_user.user_id()).await?;

    let updated = sqlx::query_as::<_, OrganizationRow>(&format!(
        "UPDATE organizations SET club_name = COALESCE($1, club_name), \
         club_logo = COALESCE($2, club_logo), updated_at = NOW() \
         WHERE org_id = $3 RETURNING {}",
        ORGANIZATION_COLUMNS
    ))
    .bind(&req.club_name)
    .bind(&req.club_logo)
    .bind(&org.org_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(updated.into()))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<PlanInfo>> {
    auth_user.require_staff()?;
    let plan = plans::plan_for_user(&state.pool, &state.config, &auth_user.user).await?;
    Ok(Json(plan))
}
