//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use mcd_shared::Role;
use serde_json::json;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::sessions::{self, SESSION_COOKIE};
use crate::models::UserRow;

/// The effective user of a request
///
/// When an admin impersonates someone, `user` is the impersonated account and
/// `impersonated_by` holds the admin's user id.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: UserRow,
    pub impersonated_by: Option<String>,
    /// Digest of the presented token, used to end this session
    pub token_hash: String,
}

impl AuthUser {
    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }

    pub fn role(&self) -> Role {
        self.user.role()
    }

    /// Coach developers and admins
    pub fn require_staff(&self) -> Result<(), AuthError> {
        if self.role().is_staff() {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions(
                "Coach Developer role required",
            ))
        }
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.role() == Role::Admin {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions("Admin access required"))
        }
    }

    pub fn require_coach(&self) -> Result<(), AuthError> {
        if self.role() == Role::Coach {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions("Coach access required"))
        }
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub pool: PgPool,
}

fn extract_token_from_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            cookie
                .trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .filter(|token| !token.is_empty())
                .map(String::from)
        })
}

/// Session token from the `session_token` cookie, falling back to
/// `Authorization: Bearer`
pub fn extract_session_token(request: &Request) -> Option<String> {
    if let Some(token) = extract_token_from_cookie(request) {
        return Some(token);
    }

    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// Middleware that requires a valid session
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_session_token(&request) {
        Some(token) => authenticate_session(&auth_state.pool, &token).await,
        None => Err(AuthError::MissingAuth),
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id(),
                role = %auth_user.role(),
                impersonated_by = ?auth_user.impersonated_by,
                "require_auth: authentication successful"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::debug!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

/// Resolve a raw session token to the effective user
pub async fn authenticate_session(pool: &PgPool, token: &str) -> Result<AuthUser, AuthError> {
    let session = sessions::find_session(pool, token)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "Session lookup failed");
            AuthError::DatabaseError
        })?
        .ok_or(AuthError::InvalidToken)?;

    if session.is_expired(OffsetDateTime::now_utc()) {
        if let Err(e) = sessions::delete_session_by_hash(pool, &session.token_hash).await {
            tracing::warn!(error = ?e, "Failed to delete expired session");
        }
        return Err(AuthError::InvalidToken);
    }

    if let Some(target_id) = &session.impersonating_user_id {
        let target = UserRow::find_by_id(pool, target_id).await.map_err(|e| {
            tracing::error!(error = ?e, "Impersonation target lookup failed");
            AuthError::DatabaseError
        })?;
        if let Some(user) = target {
            return Ok(AuthUser {
                user,
                impersonated_by: Some(session.user_id.clone()),
                token_hash: session.token_hash,
            });
        }
    }

    let user = UserRow::find_by_id(pool, &session.user_id)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "Session user lookup failed");
            AuthError::DatabaseError
        })?
        .ok_or(AuthError::InvalidToken)?;

    Ok(AuthUser {
        user,
        impersonated_by: None,
        token_hash: session.token_hash,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingAuth,
    #[error("Not authenticated")]
    InvalidToken,
    #[error("{0}")]
    InsufficientPermissions(&'static str),
    #[error("Database error")]
    DatabaseError,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingAuth | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            AuthError::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AuthError::DatabaseError => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "detail": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
