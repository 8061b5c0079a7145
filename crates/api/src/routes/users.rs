//! User account management (coach developers)

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    access,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::{UserResponse, UserRow, USER_COLUMNS},
    state::AppState,
};

pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    auth_user.require_staff()?;

    let users = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users ORDER BY created_at DESC LIMIT 100",
        USER_COLUMNS
    ))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdateRequest {
    pub new_role: String,
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(req): Json<RoleUpdateRequest>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    if user_id == auth_user.user_id() {
        return Err(ApiError::BadRequest(
            "Cannot change your own role".to_string(),
        ));
    }
    let role = access::assignable_role(&req.new_role)?;

    let updated = sqlx::query("UPDATE users SET role = $1 WHERE user_id = $2")
        .bind(role.as_str())
        .bind(&user_id)
        .execute(&state.pool)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id = %user_id, role = %role, changed_by = %auth_user.user_id(), "Role updated");
    Ok(Json(json!({ "status": "updated", "new_role": role.as_str() })))
}

#[derive(Debug, Deserialize)]
pub struct LinkCoachRequest {
    pub coach_id: Option<String>,
}

pub async fn link_coach(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(req): Json<LinkCoachRequest>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let updated = sqlx::query("UPDATE users SET linked_coach_id = $1 WHERE user_id = $2")
        .bind(&req.coach_id)
        .bind(&user_id)
        .execute(&state.pool)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    Ok(Json(json!({ "status": "linked", "coach_id": req.coach_id })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    if user_id == auth_user.user_id() {
        return Err(ApiError::BadRequest(
            "You cannot delete your own account".to_string(),
        ));
    }

    let target = UserRow::find_by_id(&state.pool, &user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let mut tx = state.pool.begin().await?;

    sqlx::query("DELETE FROM user_sessions WHERE user_id = $1 OR impersonating_user_id = $1")
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM password_resets WHERE user_id = $1")
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;

    if let Some(coach_id) = &target.linked_coach_id {
        sqlx::query("DELETE FROM coaches WHERE id = $1")
            .bind(coach_id)
            .execute(&mut *tx)
            .await?;
        tracing::info!(coach_id = %coach_id, user_id = %user_id, "Deleted coach profile with user");
    }

    let invites_deleted =
        sqlx::query("DELETE FROM invites WHERE LOWER(email) = LOWER($1) AND used = FALSE")
            .bind(&target.email)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    if invites_deleted > 0 {
        tracing::info!(count = invites_deleted, email = %target.email, "Deleted pending invites");
    }

    sqlx::query("DELETE FROM users WHERE user_id = $1")
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Json(json!({
        "status": "deleted",
        "user_id": user_id,
        "coach_deleted": target.linked_coach_id.is_some(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct LinkByEmailRequest {
    #[serde(default)]
    pub email: String,
    pub coach_id: Option<String>,
}

pub async fn link_by_email(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<LinkByEmailRequest>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let email = mcd_shared::normalize_email(&req.email);
    let coach_id = match req.coach_id.filter(|c| !c.is_empty()) {
        Some(coach_id) if !email.is_empty() => coach_id,
        _ => {
            return Err(ApiError::BadRequest(
                "Email and coach_id are required".to_string(),
            ))
        }
    };

    let Some(user) = UserRow::find_by_email(&state.pool, &email).await? else {
        return Ok(Json(json!({
            "linked": false,
            "message": "No user found with that email",
        })));
    };

    sqlx::query("UPDATE users SET linked_coach_id = $1 WHERE user_id = $2")
        .bind(&coach_id)
        .bind(&user.user_id)
        .execute(&state.pool)
        .await?;

    Ok(Json(json!({
        "linked": true,
        "user_id": user.user_id,
        "coach_id": coach_id,
    })))
}

pub async fn check_first(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let count = UserRow::count(&state.pool).await?;
    Ok(Json(json!({ "is_first": count == 0 })))
}
