//! Edge Case Tests for Authentication System
//!
//! Tests boundary conditions in:
//! - Cookie parsing (AUTH-C01 to AUTH-C04)
//! - Session expiry (AUTH-S01 to AUTH-S02)
//! - Password hashing (AUTH-P01 to AUTH-P02)

#[cfg(test)]
mod cookie_tests {
    use super::super::middleware::extract_session_token;
    use axum::{body::Body, extract::Request, http::header};

    fn with_cookie(value: &str) -> Request {
        Request::builder()
            .uri("/")
            .header(header::COOKIE, value)
            .body(Body::empty())
            .unwrap()
    }

    // =========================================================================
    // AUTH-C01: Cookie with a similar name must not match
    // =========================================================================
    #[test]
    fn test_similar_cookie_name_ignored() {
        let req = with_cookie("session_token_old=stale; other=1");
        assert!(extract_session_token(&req).is_none());
    }

    // =========================================================================
    // AUTH-C02: Empty cookie value falls through to the header
    // =========================================================================
    #[test]
    fn test_empty_cookie_falls_back_to_header() {
        let req = Request::builder()
            .uri("/")
            .header(header::COOKIE, "session_token=")
            .header(header::AUTHORIZATION, "Bearer header-token")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_session_token(&req).as_deref(), Some("header-token"));
    }

    // =========================================================================
    // AUTH-C03: Token containing '=' padding survives parsing
    // =========================================================================
    #[test]
    fn test_token_with_equals_sign() {
        let req = with_cookie("session_token=abc==; theme=dark");
        assert_eq!(extract_session_token(&req).as_deref(), Some("abc=="));
    }

    // =========================================================================
    // AUTH-C04: Empty bearer token rejected
    // =========================================================================
    #[test]
    fn test_empty_bearer_rejected() {
        let req = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer   ")
            .body(Body::empty())
            .unwrap();
        assert!(extract_session_token(&req).is_none());
    }
}

#[cfg(test)]
mod session_tests {
    use super::super::sessions::*;
    use time::{Duration, OffsetDateTime};

    fn row(expires_at: OffsetDateTime) -> SessionRow {
        SessionRow {
            token_hash: hash_token("token"),
            user_id: "user_1".to_string(),
            impersonating_user_id: None,
            expires_at,
        }
    }

    // =========================================================================
    // AUTH-S01: Session expiring exactly now is still valid
    // =========================================================================
    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = OffsetDateTime::now_utc();
        assert!(!row(now).is_expired(now));
        assert!(row(now).is_expired(now + Duration::milliseconds(1)));
    }

    // =========================================================================
    // AUTH-S02: Different tokens never share a digest
    // =========================================================================
    #[test]
    fn test_distinct_tokens_distinct_hashes() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(hash_token(&a), hash_token(&b));
    }
}

#[cfg(test)]
mod password_tests {
    use super::super::password::*;

    // =========================================================================
    // AUTH-P01: Unicode passwords hash and verify
    // =========================================================================
    #[test]
    fn test_unicode_password() {
        let hash = hash_password("trainér2024ü").unwrap();
        assert!(verify_password("trainér2024ü", &hash));
        assert!(!verify_password("trainer2024u", &hash));
    }

    // =========================================================================
    // AUTH-P02: Empty password never verifies against a real hash
    // =========================================================================
    #[test]
    fn test_empty_password_rejected() {
        let hash = hash_password("abcdefg1").unwrap();
        assert!(!verify_password("", &hash));
    }
}
