//! Session parts: the phases an observation is split into

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
    state::AppState,
};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SessionPartRow {
    pub part_id: String,
    pub name: String,
    pub is_default: bool,
    pub created_by: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub async fn list_parts(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<SessionPartRow>>> {
    let parts = sqlx::query_as::<_, SessionPartRow>(
        "SELECT part_id, name, is_default, created_by, created_at FROM session_parts \
         ORDER BY is_default DESC, created_at ASC",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(parts))
}

#[derive(Debug, Deserialize)]
pub struct PartCreate {
    pub name: String,
}

pub async fn create_part(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PartCreate>,
) -> ApiResult<Json<SessionPartRow>> {
    auth_user.require_staff()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Part name is required".to_string()));
    }

    let part = sqlx::query_as::<_, SessionPartRow>(
        "INSERT INTO session_parts (part_id, name, is_default, created_by) \
         VALUES ($1, $2, FALSE, $3) \
         RETURNING part_id, name, is_default, created_by, created_at",
    )
    .bind(new_id(IdPrefix::SessionPart))
    .bind(name)
    .bind(auth_user.user_id())
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(part_id = %part.part_id, created_by = %auth_user.user_id(), "Session part created");
    Ok(Json(part))
}

pub async fn delete_part(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(part_id): Path<String>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let is_default: Option<(bool,)> =
        sqlx::query_as("SELECT is_default FROM session_parts WHERE part_id = $1")
            .bind(&part_id)
            .fetch_optional(&state.pool)
            .await?;

    match is_default {
        None => return Err(ApiError::NotFound("Session part not found".to_string())),
        Some((true,)) => {
            return Err(ApiError::BadRequest(
                "Default session parts cannot be deleted".to_string(),
            ))
        }
        Some((false,)) => {}
    }

    sqlx::query("DELETE FROM session_parts WHERE part_id = $1")
        .bind(&part_id)
        .execute(&state.pool)
        .await?;

    tracing::info!(part_id = %part_id, deleted_by = %auth_user.user_id(), "Session part deleted");
    Ok(Json(super::status_body("deleted")))
}
