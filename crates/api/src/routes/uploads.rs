//! File uploads for session attachments and club logos
//!
//! Files land in `UPLOAD_DIR` as `<file_id><ext>` and are served back
//! under `/api/uploads/`.

use std::path::Path as FsPath;

use axum::{
    extract::{Multipart, Path, State},
    Extension, Json,
};
use mcd_shared::{new_id, IdPrefix, Role};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const MAX_EXTENSION_LEN: usize = 10;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: i64,
    pub url: String,
    #[serde(rename = "uploadedAt", with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

/// Lowercased `.ext` of an uploaded filename, or empty when it has none we
/// are willing to put on disk
pub(crate) fn stored_extension(filename: &str) -> String {
    FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub async fn upload_file(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid upload: {}", e)))?
        {
            Some(field) if field.name() == Some("file") => break field,
            Some(_) => continue,
            None => return Err(ApiError::BadRequest("No file provided".to_string())),
        }
    };

    let name = field.file_name().unwrap_or("upload").to_string();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid upload: {}", e)))?;

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }
    if bytes.len() > state.config.max_upload_bytes {
        return Err(ApiError::BadRequest(format!(
            "File too large. Maximum size is {} MB",
            state.config.max_upload_bytes / (1024 * 1024)
        )));
    }

    let file_id = new_id(IdPrefix::File);
    let stored_name = format!("{}{}", file_id, stored_extension(&name));
    let url = format!("/api/uploads/{}", stored_name);

    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("create upload dir: {}", e)))?;
    tokio::fs::write(state.config.upload_dir.join(&stored_name), &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("write upload: {}", e)))?;

    let size = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
    let (uploaded_at,): (OffsetDateTime,) = sqlx::query_as(
        "INSERT INTO uploads (id, name, content_type, size, stored_name, url, uploaded_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING uploaded_at",
    )
    .bind(&file_id)
    .bind(&name)
    .bind(&content_type)
    .bind(size)
    .bind(&stored_name)
    .bind(&url)
    .bind(auth_user.user_id())
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(file_id = %file_id, size, uploaded_by = %auth_user.user_id(), "File uploaded");

    Ok(Json(UploadResponse {
        id: file_id,
        name,
        content_type,
        size,
        url,
        uploaded_at,
    }))
}

#[derive(Debug, FromRow)]
struct StoredUpload {
    stored_name: String,
    uploaded_by: String,
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let upload = sqlx::query_as::<_, StoredUpload>(
        "SELECT stored_name, uploaded_by FROM uploads WHERE id = $1",
    )
    .bind(&file_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    if upload.uploaded_by != auth_user.user_id() && auth_user.role() != Role::Admin {
        return Err(ApiError::Forbidden(
            "You can only delete your own files".to_string(),
        ));
    }

    let path = state.config.upload_dir.join(&upload.stored_name);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::warn!(file_id = %file_id, error = %e, "Uploaded file already missing from disk");
    }

    sqlx::query("DELETE FROM uploads WHERE id = $1")
        .bind(&file_id)
        .execute(&state.pool)
        .await?;

    tracing::info!(file_id = %file_id, deleted_by = %auth_user.user_id(), "File deleted");
    Ok(Json(super::status_body("deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_extension() {
        assert_eq!(stored_extension("drill.PNG"), ".png");
        assert_eq!(stored_extension("session.notes.pdf"), ".pdf");
        assert_eq!(stored_extension("README"), "");
        assert_eq!(stored_extension("evil.p/h"), "");
        assert_eq!(stored_extension("clip.averyverylongext"), "");
        assert_eq!(stored_extension(".hidden"), "");
    }
}
