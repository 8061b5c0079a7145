//! Sign-in, sign-up and password management

use axum::{
    extract::{Path, Request, State},
    http::HeaderMap,
    Extension, Json,
};
use mcd_shared::{new_id, normalize_email, validate_email, validate_password, IdPrefix, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};

use crate::{
    access,
    auth::{
        clear_session_cookie, cookie_headers, create_session, extract_session_token, generate_token,
        hash_password, hash_token, revoke_all_sessions, session_cookie, store_session,
        verify_password, AuthUser,
    },
    error::{ApiError, ApiResult},
    linking::{self, AccountLink},
    models::{InviteRow, OrganizationRow, UserResponse, UserRow, USER_COLUMNS},
    routes::organization::inviter_org_id,
    state::AppState,
};

const RESET_TOKEN_TTL_HOURS: i64 = 1;

const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with this email exists, a password reset link has been sent.";

const EMAIL_TAKEN: &str = "An account with this email already exists";

// =============================================================================
// Helpers
// =============================================================================

struct NewUser<'a> {
    email: &'a str,
    name: &'a str,
    picture: Option<&'a str>,
    role: Role,
    linked_coach_id: Option<&'a str>,
    organization_id: Option<&'a str>,
    password_hash: Option<&'a str>,
    auth_provider: &'static str,
    marketing_opt_in: bool,
    /// Invite consumed by this registration
    invite_id: Option<&'a str>,
}

const INVITE_ALREADY_USED: &str = "This invite has already been used";

/// Single statement that consumes the invite (when there is one) and inserts
/// the account. A failed insert leaves the invite unused, and an invite can
/// only be redeemed by one insert.
fn insert_user_sql() -> String {
    format!(
        r#"
        WITH claimed AS (
            UPDATE invites SET used = TRUE, used_at = NOW()
            WHERE invite_id = $11 AND used = FALSE
            RETURNING invite_id
        )
        INSERT INTO users (
            user_id, email, name, picture, role, linked_coach_id, organization_id,
            password_hash, auth_provider, marketing_opt_in, marketing_opt_in_at
        )
        SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, CASE WHEN $10 THEN NOW() END
        WHERE $11::TEXT IS NULL OR EXISTS (SELECT 1 FROM claimed)
        RETURNING {}
        "#,
        USER_COLUMNS
    )
}

fn insert_failure(e: sqlx::Error) -> ApiError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => ApiError::Conflict(EMAIL_TAKEN.to_string()),
        _ => ApiError::Database(e),
    }
}

async fn insert_user(pool: &PgPool, new: NewUser<'_>) -> ApiResult<UserRow> {
    let user_id = new_id(IdPrefix::User);

    sqlx::query_as::<_, UserRow>(&insert_user_sql())
        .bind(&user_id)
        .bind(new.email)
        .bind(new.name)
        .bind(new.picture)
        .bind(new.role.as_str())
        .bind(new.linked_coach_id)
        .bind(new.organization_id)
        .bind(new.password_hash)
        .bind(new.auth_provider)
        .bind(new.marketing_opt_in)
        .bind(new.invite_id)
        .fetch_optional(pool)
        .await
        .map_err(insert_failure)?
        .ok_or_else(|| ApiError::Conflict(INVITE_ALREADY_USED.to_string()))
}

/// Cookie plus JSON body carrying the same token
fn with_session_cookie(state: &AppState, token: &str, body: Value) -> (HeaderMap, Json<Value>) {
    let cookie = session_cookie(
        token,
        state.config.session_ttl_days,
        state.config.cookie_secure,
    );
    (cookie_headers(&cookie), Json(body))
}

fn account_body(user: &UserRow, token: &str) -> Value {
    json!({
        "user_id": user.user_id,
        "email": user.email,
        "name": user.name,
        "picture": user.picture,
        "role": user.role,
        "linked_coach_id": user.linked_coach_id,
        "organization_id": user.organization_id,
        "auth_provider": user.auth_provider,
        "token": token,
    })
}

#[derive(Debug, FromRow)]
struct PasswordResetRow {
    token_hash: String,
    user_id: String,
    email: String,
    expires_at: OffsetDateTime,
}

async fn find_reset(pool: &PgPool, token: &str) -> ApiResult<Option<PasswordResetRow>> {
    Ok(sqlx::query_as::<_, PasswordResetRow>(
        "SELECT token_hash, user_id, email, expires_at FROM password_resets WHERE token_hash = $1",
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?)
}

// =============================================================================
// Google session exchange
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionExchangeRequest {
    pub session_id: Option<String>,
}

pub async fn google_session(
    State(state): State<AppState>,
    Json(req): Json<SessionExchangeRequest>,
) -> ApiResult<(HeaderMap, Json<Value>)> {
    let session_id = req
        .session_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("session_id required".to_string()))?;

    let data = state.google.exchange(&session_id).await?;
    let email = normalize_email(&data.email);
    tracing::info!(email = %email, "Google session exchanged");

    let user = match UserRow::find_by_email(&state.pool, &email).await? {
        Some(existing) => {
            sqlx::query_as::<_, UserRow>(&format!(
                "UPDATE users SET name = $1, picture = $2 WHERE user_id = $3 RETURNING {}",
                USER_COLUMNS
            ))
            .bind(&data.name)
            .bind(&data.picture)
            .bind(&existing.user_id)
            .fetch_one(&state.pool)
            .await?
        }
        None => {
            let user_count = UserRow::count(&state.pool).await?;
            let invite = InviteRow::find_pending_for_email(&state.pool, &email).await?;
            let role = access::registration_grant(user_count, invite.as_ref())?;

            let mut linked_coach_id = None;
            let mut organization_id = None;
            let consumed_invite = invite.as_ref().filter(|_| user_count > 0);
            if let Some(invite) = consumed_invite {
                organization_id = inviter_org_id(&state.pool, invite).await?;
                linked_coach_id = invite.coach_id.clone();

                if role == Role::Coach && linked_coach_id.is_none() {
                    linked_coach_id = Some(
                        linking::find_or_create_invited_profile(
                            &state.pool,
                            &email,
                            &data.name,
                            data.picture.as_deref(),
                            &invite.invited_by,
                        )
                        .await?,
                    );
                }
            }

            let user = insert_user(
                &state.pool,
                NewUser {
                    email: &email,
                    name: &data.name,
                    picture: data.picture.as_deref(),
                    role,
                    linked_coach_id: linked_coach_id.as_deref(),
                    organization_id: organization_id.as_deref(),
                    password_hash: None,
                    auth_provider: "google",
                    marketing_opt_in: false,
                    invite_id: consumed_invite.map(|i| i.invite_id.as_str()),
                },
            )
            .await?;

            if let (Role::Coach, Some(coach_id)) = (role, linked_coach_id.as_deref()) {
                linking::attach_account(
                    &state.pool,
                    coach_id,
                    &user.user_id,
                    AccountLink {
                        photo: data.picture.as_deref(),
                        organization_id: organization_id.as_deref(),
                        ..Default::default()
                    },
                )
                .await?;
            }

            tracing::info!(user_id = %user.user_id, role = %role, "Created account via Google sign-in");
            user
        }
    };

    store_session(
        &state.pool,
        &data.session_token,
        &user.user_id,
        None,
        state.config.session_ttl_days,
    )
    .await?;

    Ok(with_session_cookie(
        &state,
        &data.session_token,
        account_body(&user, &data.session_token),
    ))
}

// =============================================================================
// Current session
// =============================================================================

#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<String>,
}

pub async fn me(Extension(auth_user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user: UserResponse::from(&auth_user.user),
        impersonated_by: auth_user.impersonated_by.clone(),
    })
}

pub async fn logout(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<(HeaderMap, Json<Value>)> {
    if let Some(token) = extract_session_token(&request) {
        sqlx::query("DELETE FROM user_sessions WHERE token_hash = $1")
            .bind(hash_token(&token))
            .execute(&state.pool)
            .await?;
    }

    let cookie = clear_session_cookie(state.config.cookie_secure);
    Ok((
        cookie_headers(&cookie),
        Json(json!({ "status": "logged out" })),
    ))
}

// =============================================================================
// Email + password accounts
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub club_name: Option<String>,
    pub club_logo: Option<String>,
    #[serde(default)]
    pub marketing_opt_in: bool,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(HeaderMap, Json<Value>)> {
    if !validate_email(&req.email) {
        return Err(ApiError::BadRequest("Invalid email format".to_string()));
    }
    validate_password(&req.password)?;

    let email = normalize_email(&req.email);
    if UserRow::find_by_email(&state.pool, &email).await?.is_some() {
        return Err(ApiError::BadRequest(EMAIL_TAKEN.to_string()));
    }

    let user_count = UserRow::count(&state.pool).await?;
    let invite = if user_count == 0 {
        None
    } else {
        InviteRow::find_pending_for_email(&state.pool, &email).await?
    };
    let role = access::registration_grant(user_count, invite.as_ref())?;

    let organization_id = match &invite {
        Some(invite) => inviter_org_id(&state.pool, invite).await?,
        None => None,
    };
    let linked_coach_id = invite.as_ref().and_then(|i| i.coach_id.clone());

    let password_hash = hash_password(&req.password)?;
    let user = insert_user(
        &state.pool,
        NewUser {
            email: &email,
            name: req.name.trim(),
            picture: None,
            role,
            linked_coach_id: linked_coach_id.as_deref(),
            organization_id: organization_id.as_deref(),
            password_hash: Some(&password_hash),
            auth_provider: "email",
            marketing_opt_in: req.marketing_opt_in,
            invite_id: invite.as_ref().map(|i| i.invite_id.as_str()),
        },
    )
    .await?;

    if role == Role::CoachDeveloper && (req.club_name.is_some() || req.club_logo.is_some()) {
        let org = OrganizationRow::create(
            &state.pool,
            &new_id(IdPrefix::Organization),
            &user.user_id,
            req.club_name.as_deref(),
            req.club_logo.as_deref(),
        )
        .await?;
        tracing::info!(org_id = %org.org_id, user_id = %user.user_id, "Created organization at signup");
    }

    if let (Role::Coach, Some(coach_id)) = (role, linked_coach_id.as_deref()) {
        linking::attach_account(
            &state.pool,
            coach_id,
            &user.user_id,
            AccountLink {
                organization_id: organization_id.as_deref(),
                ..Default::default()
            },
        )
        .await?;
    }

    let token = create_session(&state.pool, &user.user_id, state.config.session_ttl_days).await?;
    tracing::info!(user_id = %user.user_id, role = %role, "Account created");

    Ok(with_session_cookie(
        &state,
        &token,
        account_body(&user, &token),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<(HeaderMap, Json<Value>)> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = UserRow::find_by_email(&state.pool, &req.email)
        .await?
        .ok_or_else(invalid)?;

    let stored_hash = user.password_hash.as_deref().ok_or_else(|| {
        ApiError::Unauthorized(
            "This account uses Google sign-in. Please use 'Sign in with Google'.".to_string(),
        )
    })?;

    if !verify_password(&req.password, stored_hash) {
        tracing::debug!(user_id = %user.user_id, "Login rejected: wrong password");
        return Err(invalid());
    }

    let token = create_session(&state.pool, &user.user_id, state.config.session_ttl_days).await?;
    Ok(with_session_cookie(
        &state,
        &token,
        account_body(&user, &token),
    ))
}

// =============================================================================
// Password reset
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Always answers with the same message so accounts cannot be enumerated
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Json<Value> {
    if let Err(e) = issue_reset_token(&state, &req.email).await {
        tracing::error!(error = %e, "Forgot password processing failed");
    }
    Json(json!({ "message": FORGOT_PASSWORD_MESSAGE }))
}

async fn issue_reset_token(state: &AppState, email: &str) -> ApiResult<()> {
    let Some(user) = UserRow::find_by_email(&state.pool, email).await? else {
        return Ok(());
    };
    if user.password_hash.is_none() && user.auth_provider == "google" {
        return Ok(());
    }

    let token = generate_token();
    let expires_at = OffsetDateTime::now_utc() + Duration::hours(RESET_TOKEN_TTL_HOURS);

    sqlx::query("DELETE FROM password_resets WHERE user_id = $1")
        .bind(&user.user_id)
        .execute(&state.pool)
        .await?;
    sqlx::query(
        "INSERT INTO password_resets (token_hash, user_id, email, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(hash_token(&token))
    .bind(&user.user_id)
    .bind(&user.email)
    .bind(expires_at)
    .execute(&state.pool)
    .await?;

    if let Err(e) = state
        .email
        .send_password_reset(&user.email, &token, &user.name)
        .await
    {
        tracing::error!(user_id = %user.user_id, error = %e, "Failed to send password reset email");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<Value>> {
    let reset = find_reset(&state.pool, &req.token)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid or expired reset token".to_string()))?;

    if reset.expires_at < OffsetDateTime::now_utc() {
        sqlx::query("DELETE FROM password_resets WHERE token_hash = $1")
            .bind(&reset.token_hash)
            .execute(&state.pool)
            .await?;
        return Err(ApiError::BadRequest("Reset token has expired".to_string()));
    }

    validate_password(&req.new_password)?;
    let password_hash = hash_password(&req.new_password)?;

    let updated = sqlx::query(
        "UPDATE users SET password_hash = $1, auth_provider = 'email' WHERE user_id = $2",
    )
    .bind(&password_hash)
    .bind(&reset.user_id)
    .execute(&state.pool)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(ApiError::BadRequest("User not found".to_string()));
    }

    sqlx::query("DELETE FROM password_resets WHERE token_hash = $1")
        .bind(&reset.token_hash)
        .execute(&state.pool)
        .await?;
    revoke_all_sessions(&state.pool, &reset.user_id).await?;

    tracing::info!(user_id = %reset.user_id, email = %reset.email, "Password reset completed");
    Ok(Json(json!({
        "message": "Password has been reset successfully. Please log in with your new password."
    })))
}

pub async fn verify_reset_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Json<Value> {
    match find_reset(&state.pool, &token).await {
        Ok(Some(reset)) if reset.expires_at < OffsetDateTime::now_utc() => {
            Json(json!({ "valid": false, "message": "Reset token has expired" }))
        }
        Ok(Some(reset)) => Json(json!({ "valid": true, "email": reset.email })),
        Ok(None) => Json(json!({ "valid": false, "message": "Invalid reset token" })),
        Err(e) => {
            tracing::error!(error = %e, "Verify reset token failed");
            Json(json!({ "valid": false, "message": "Failed to verify token" }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<Value>> {
    let stored_hash = auth_user.user.password_hash.as_deref().ok_or_else(|| {
        ApiError::BadRequest("Cannot change password for Google-only accounts".to_string())
    })?;

    if !verify_password(&req.current_password, stored_hash) {
        return Err(ApiError::Unauthorized(
            "Current password is incorrect".to_string(),
        ));
    }

    validate_password(&req.new_password)?;
    let password_hash = hash_password(&req.new_password)?;

    sqlx::query("UPDATE users SET password_hash = $1 WHERE user_id = $2")
        .bind(&password_hash)
        .bind(auth_user.user_id())
        .execute(&state.pool)
        .await?;

    Ok(Json(json!({ "message": "Password changed successfully" })))
}

// =============================================================================
// Invite registration
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterInviteRequest {
    pub invite_id: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub marketing_opt_in: bool,
}

pub async fn register_invite(
    State(state): State<AppState>,
    Json(req): Json<RegisterInviteRequest>,
) -> ApiResult<(HeaderMap, Json<Value>)> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(invite_id), Some(password), Some(name)) = (
        non_empty(req.invite_id),
        non_empty(req.password),
        non_empty(req.name),
    ) else {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    };

    validate_password(&password)?;

    let invite = InviteRow::find_by_id(&state.pool, &invite_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid invite link".to_string()))?;
    if invite.used {
        return Err(ApiError::BadRequest(INVITE_ALREADY_USED.to_string()));
    }

    if UserRow::find_by_email(&state.pool, &invite.email)
        .await?
        .is_some()
    {
        return Err(ApiError::BadRequest(EMAIL_TAKEN.to_string()));
    }

    let organization_id = inviter_org_id(&state.pool, &invite).await?;
    let password_hash = hash_password(&password)?;
    let role = invite.role();

    let user = insert_user(
        &state.pool,
        NewUser {
            email: &invite.email,
            name: name.trim(),
            picture: None,
            role,
            linked_coach_id: invite.coach_id.as_deref(),
            organization_id: organization_id.as_deref(),
            password_hash: Some(&password_hash),
            auth_provider: "email",
            marketing_opt_in: req.marketing_opt_in,
            invite_id: Some(&invite.invite_id),
        },
    )
    .await?;

    if let Some(coach_id) = invite.coach_id.as_deref() {
        linking::attach_account(
            &state.pool,
            coach_id,
            &user.user_id,
            AccountLink {
                name: Some(name.trim()),
                organization_id: organization_id.as_deref(),
                ..Default::default()
            },
        )
        .await?;
    }

    let token = create_session(&state.pool, &user.user_id, state.config.session_ttl_days).await?;
    tracing::info!(user_id = %user.user_id, invite_id = %invite.invite_id, "Registered via invite");

    Ok(with_session_cookie(
        &state,
        &token,
        account_body(&user, &token),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;

    #[derive(Debug)]
    struct DuplicateEmail;

    impl std::fmt::Display for DuplicateEmail {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("duplicate key value violates unique constraint \"users_email_key\"")
        }
    }

    impl std::error::Error for DuplicateEmail {}

    impl DatabaseError for DuplicateEmail {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint \"users_email_key\""
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23505"))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn test_invite_claimed_in_same_statement_as_insert() {
        let sql = insert_user_sql();
        let claim = sql.find("UPDATE invites SET used = TRUE").unwrap();
        let insert = sql.find("INSERT INTO users").unwrap();
        assert!(claim < insert);
        assert!(sql.contains("AND used = FALSE"));
        assert!(sql.contains("WHERE $11::TEXT IS NULL OR EXISTS (SELECT 1 FROM claimed)"));
        assert!(sql.contains(&format!("RETURNING {}", USER_COLUMNS)));
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let err = insert_failure(sqlx::Error::Database(Box::new(DuplicateEmail)));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), EMAIL_TAKEN);
    }

    #[test]
    fn test_other_insert_failures_stay_database_errors() {
        let err = insert_failure(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, ApiError::Database(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
