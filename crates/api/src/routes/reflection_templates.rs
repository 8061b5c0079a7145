//! Reflection templates
//!
//! Templates are question sets used for observer (`coach_educator`) and coach
//! reflections. Each organization sees its own templates plus global ones
//! (no organization). At most one template per role and organization is the
//! default.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use mcd_shared::{new_id, IdPrefix, TemplateRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json as SqlJson, FromRow, PgConnection};
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::UserRow,
    routes::organization,
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Text,
    Scale,
    Dropdown,
    Checkbox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateQuestion {
    pub question_id: String,
    pub question_text: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_scale_min")]
    pub scale_min: Option<i32>,
    #[serde(default = "default_scale_max")]
    pub scale_max: Option<i32>,
    pub scale_min_label: Option<String>,
    pub scale_max_label: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

fn default_scale_min() -> Option<i32> {
    Some(1)
}

fn default_scale_max() -> Option<i32> {
    Some(5)
}

impl TemplateQuestion {
    pub fn validate(&self) -> Result<(), String> {
        if self.question_text.trim().is_empty() {
            return Err("Question text is required".to_string());
        }
        match self.question_type {
            QuestionType::Scale => {
                let (min, max) = (self.scale_min.unwrap_or(1), self.scale_max.unwrap_or(5));
                if min >= max {
                    return Err(format!(
                        "Scale question '{}' needs scale_min below scale_max",
                        self.question_text
                    ));
                }
            }
            QuestionType::Dropdown | QuestionType::Checkbox => {
                if self.options.iter().all(|o| o.trim().is_empty()) {
                    return Err(format!(
                        "Question '{}' needs at least one option",
                        self.question_text
                    ));
                }
            }
            QuestionType::Text => {}
        }
        Ok(())
    }
}

fn validate_questions(questions: &[TemplateQuestion]) -> ApiResult<()> {
    questions
        .iter()
        .try_for_each(TemplateQuestion::validate)
        .map_err(ApiError::BadRequest)
}

fn parse_target_role(role: &str) -> ApiResult<TemplateRole> {
    role.parse::<TemplateRole>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

const TEMPLATE_COLUMNS: &str = "template_id, name, target_role, description, questions, \
     is_default, created_by, organization_id, created_at, updated_at";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TemplateRow {
    pub template_id: String,
    pub name: String,
    pub target_role: String,
    pub description: Option<String>,
    pub questions: SqlJson<Vec<Value>>,
    pub is_default: bool,
    pub created_by: String,
    pub organization_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

async fn caller_org(state: &AppState, user: &UserRow) -> ApiResult<Option<String>> {
    Ok(organization::resolve_for_user(&state.pool, user)
        .await?
        .map(|org| org.org_id))
}

/// Template visible to the caller: their organization's or a global one
async fn find_visible(
    state: &AppState,
    template_id: &str,
    org_id: Option<&str>,
) -> ApiResult<TemplateRow> {
    sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {} FROM reflection_templates WHERE template_id = $1 \
         AND (organization_id IS NULL OR organization_id = $2)",
        TEMPLATE_COLUMNS
    ))
    .bind(template_id)
    .bind(org_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Template not found".to_string()))
}

/// Clear the default flag on every other template sharing role and organization
async fn clear_other_defaults(
    conn: &mut PgConnection,
    template: &TemplateRow,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE reflection_templates SET is_default = FALSE, updated_at = NOW() \
         WHERE target_role = $1 AND organization_id IS NOT DISTINCT FROM $2 \
         AND template_id <> $3 AND is_default",
    )
    .bind(&template.target_role)
    .bind(&template.organization_id)
    .bind(&template.template_id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn set_default_flag(
    state: &AppState,
    template: &TemplateRow,
    is_default: bool,
) -> ApiResult<TemplateRow> {
    let mut tx = state.pool.begin().await?;
    if is_default {
        clear_other_defaults(&mut *tx, template).await?;
    }
    let updated = sqlx::query_as::<_, TemplateRow>(&format!(
        "UPDATE reflection_templates SET is_default = $1, updated_at = NOW() \
         WHERE template_id = $2 RETURNING {}",
        TEMPLATE_COLUMNS
    ))
    .bind(is_default)
    .bind(&template.template_id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(updated)
}

#[derive(Debug, Deserialize)]
pub struct TemplateListParams {
    pub target_role: Option<String>,
}

pub async fn list_templates(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(params): Query<TemplateListParams>,
) -> ApiResult<Json<Vec<TemplateRow>>> {
    let role = params
        .target_role
        .as_deref()
        .map(parse_target_role)
        .transpose()?;
    let org_id = caller_org(&state, &auth_user.user).await?;

    let templates = sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {} FROM reflection_templates \
         WHERE (organization_id IS NULL OR organization_id = $1) \
         AND ($2::TEXT IS NULL OR target_role = $2) \
         ORDER BY is_default DESC, created_at DESC",
        TEMPLATE_COLUMNS
    ))
    .bind(&org_id)
    .bind(role.map(|r| r.as_str()))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(templates))
}

pub async fn get_template(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(template_id): Path<String>,
) -> ApiResult<Json<TemplateRow>> {
    let org_id = caller_org(&state, &auth_user.user).await?;
    Ok(Json(find_visible(&state, &template_id, org_id.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
pub struct TemplateCreate {
    pub name: String,
    pub target_role: String,
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<TemplateQuestion>,
    #[serde(default)]
    pub is_default: bool,
}

pub async fn create_template(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<TemplateCreate>,
) -> ApiResult<Json<TemplateRow>> {
    auth_user.require_staff()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Template name is required".to_string()));
    }
    let role = parse_target_role(&req.target_role)?;
    validate_questions(&req.questions)?;

    let org_id = caller_org(&state, &auth_user.user).await?;
    let template = sqlx::query_as::<_, TemplateRow>(&format!(
        "INSERT INTO reflection_templates (template_id, name, target_role, description, \
         questions, is_default, created_by, organization_id) \
         VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7) RETURNING {}",
        TEMPLATE_COLUMNS
    ))
    .bind(new_id(IdPrefix::Template))
    .bind(name)
    .bind(role.as_str())
    .bind(&req.description)
    .bind(SqlJson(&req.questions))
    .bind(auth_user.user_id())
    .bind(&org_id)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(template_id = %template.template_id, created_by = %auth_user.user_id(), "Reflection template created");

    if req.is_default {
        return Ok(Json(set_default_flag(&state, &template, true).await?));
    }
    Ok(Json(template))
}

#[derive(Debug, Deserialize)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub questions: Option<Vec<TemplateQuestion>>,
    pub is_default: Option<bool>,
}

pub async fn update_template(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(template_id): Path<String>,
    Json(req): Json<TemplateUpdate>,
) -> ApiResult<Json<TemplateRow>> {
    auth_user.require_staff()?;

    if let Some(questions) = &req.questions {
        validate_questions(questions)?;
    }
    let org_id = caller_org(&state, &auth_user.user).await?;
    find_visible(&state, &template_id, org_id.as_deref()).await?;

    let template = sqlx::query_as::<_, TemplateRow>(&format!(
        "UPDATE reflection_templates SET name = COALESCE($1, name), \
         description = COALESCE($2, description), questions = COALESCE($3, questions), \
         updated_at = NOW() WHERE template_id = $4 RETURNING {}",
        TEMPLATE_COLUMNS
    ))
    .bind(req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()))
    .bind(&req.description)
    .bind(req.questions.as_ref().map(SqlJson))
    .bind(&template_id)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(template_id = %template_id, updated_by = %auth_user.user_id(), "Reflection template updated");

    match req.is_default {
        Some(flag) if flag != template.is_default => {
            Ok(Json(set_default_flag(&state, &template, flag).await?))
        }
        _ => Ok(Json(template)),
    }
}

pub async fn delete_template(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(template_id): Path<String>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;

    let org_id = caller_org(&state, &auth_user.user).await?;
    find_visible(&state, &template_id, org_id.as_deref()).await?;

    sqlx::query("DELETE FROM reflection_templates WHERE template_id = $1")
        .bind(&template_id)
        .execute(&state.pool)
        .await?;

    tracing::info!(template_id = %template_id, deleted_by = %auth_user.user_id(), "Reflection template deleted");
    Ok(Json(super::status_body("deleted")))
}

pub async fn set_default(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(template_id): Path<String>,
) -> ApiResult<Json<TemplateRow>> {
    auth_user.require_staff()?;
    let org_id = caller_org(&state, &auth_user.user).await?;
    let template = find_visible(&state, &template_id, org_id.as_deref()).await?;
    Ok(Json(set_default_flag(&state, &template, true).await?))
}

pub async fn unset_default(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(template_id): Path<String>,
) -> ApiResult<Json<TemplateRow>> {
    auth_user.require_staff()?;
    let org_id = caller_org(&state, &auth_user.user).await?;
    let template = find_visible(&state, &template_id, org_id.as_deref()).await?;
    Ok(Json(set_default_flag(&state, &template, false).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(json: &str) -> TemplateQuestion {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_text_question_defaults() {
        let q = question(r#"{"question_id": "q1", "question_text": "How did it go?", "question_type": "text"}"#);
        assert!(!q.required);
        assert_eq!(q.scale_min, Some(1));
        assert_eq!(q.scale_max, Some(5));
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_scale_bounds() {
        let ok = question(
            r#"{"question_id": "q1", "question_text": "Rate it", "question_type": "scale",
                "scale_min": 1, "scale_max": 10, "scale_min_label": "Not Effective"}"#,
        );
        assert!(ok.validate().is_ok());

        let inverted = question(
            r#"{"question_id": "q1", "question_text": "Rate it", "question_type": "scale",
                "scale_min": 5, "scale_max": 5}"#,
        );
        assert!(inverted.validate().unwrap_err().contains("scale_min"));
    }

    #[test]
    fn test_choice_questions_need_options() {
        let empty = question(
            r#"{"question_id": "q1", "question_text": "Focus", "question_type": "dropdown"}"#,
        );
        assert!(empty.validate().is_err());

        let blank = question(
            r#"{"question_id": "q1", "question_text": "Style", "question_type": "checkbox", "options": ["  "]}"#,
        );
        assert!(blank.validate().is_err());

        let ok = question(
            r#"{"question_id": "q1", "question_text": "Style", "question_type": "checkbox",
                "options": ["Demonstration", "Game-Based"]}"#,
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_unknown_question_type_rejected() {
        let result = serde_json::from_str::<TemplateQuestion>(
            r#"{"question_id": "q1", "question_text": "Draw", "question_type": "sketch"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_target_role_parsing() {
        assert_eq!(parse_target_role("coach").unwrap(), TemplateRole::Coach);
        assert_eq!(
            parse_target_role("coach_educator").unwrap(),
            TemplateRole::CoachEducator
        );
        assert!(matches!(
            parse_target_role("player"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
