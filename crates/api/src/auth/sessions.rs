//! Login sessions
//!
//! A session token is 32 random bytes, base64url encoded, handed to the
//! client once. Only its SHA-256 digest is stored in `user_sessions`, so a
//! leaked table cannot be replayed.

use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};

use crate::error::ApiResult;

pub const SESSION_COOKIE: &str = "session_token";

/// Random opaque token suitable for sessions and password resets
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 of a token, the form persisted in the database
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub token_hash: String,
    pub user_id: String,
    pub impersonating_user_id: Option<String>,
    pub expires_at: OffsetDateTime,
}

impl SessionRow {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

/// Store a new session and return the raw token
pub async fn create_session(pool: &PgPool, user_id: &str, ttl_days: i64) -> ApiResult<String> {
    let token = generate_token();
    store_session(pool, &token, user_id, None, ttl_days).await?;
    Ok(token)
}

/// Store a session for a token minted elsewhere (Google exchange)
pub async fn store_session(
    pool: &PgPool,
    token: &str,
    user_id: &str,
    impersonating_user_id: Option<&str>,
    ttl_days: i64,
) -> ApiResult<()> {
    let expires_at = OffsetDateTime::now_utc() + Duration::days(ttl_days);

    sqlx::query(
        r#"
        INSERT INTO user_sessions (token_hash, user_id, impersonating_user_id, expires_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (token_hash) DO UPDATE SET
            user_id = EXCLUDED.user_id,
            impersonating_user_id = EXCLUDED.impersonating_user_id,
            expires_at = EXCLUDED.expires_at
        "#,
    )
    .bind(hash_token(token))
    .bind(user_id)
    .bind(impersonating_user_id)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_session(pool: &PgPool, token: &str) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT token_hash, user_id, impersonating_user_id, expires_at
        FROM user_sessions
        WHERE token_hash = $1
        "#,
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await
}

pub async fn delete_session_by_hash(pool: &PgPool, token_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Revoke every session for a user
///
/// Called after password resets, admin password changes and account deletion.
pub async fn revoke_all_sessions(pool: &PgPool, user_id: &str) -> ApiResult<u64> {
    let rows_affected = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?
        .rows_affected();

    tracing::info!(user_id = %user_id, revoked = rows_affected, "Revoked user sessions");
    Ok(rows_affected)
}

/// `Set-Cookie` value for a fresh session
pub fn session_cookie(token: &str, ttl_days: i64, secure: bool) -> String {
    let max_age = ttl_days * 24 * 60 * 60;
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=None",
        SESSION_COOKIE, token, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the session cookie
pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=None",
        SESSION_COOKIE
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn cookie_headers(cookie: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.insert(SET_COOKIE, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash, hash_token("abc"));
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_token("abd"));
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok", 7, true);
        assert!(cookie.starts_with("session_token=tok;"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=None"));
        assert!(cookie.ends_with("; Secure"));
    }

    #[test]
    fn test_insecure_cookie_for_local_dev() {
        assert!(!session_cookie("tok", 7, false).contains("Secure"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(false);
        assert!(cookie.starts_with("session_token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn test_expiry_check() {
        let now = OffsetDateTime::now_utc();
        let row = SessionRow {
            token_hash: hash_token("t"),
            user_id: "user_1".into(),
            impersonating_user_id: None,
            expires_at: now - Duration::seconds(1),
        };
        assert!(row.is_expired(now));
        let fresh = SessionRow {
            expires_at: now + Duration::days(7),
            ..row
        };
        assert!(!fresh.is_expired(now));
    }
}
