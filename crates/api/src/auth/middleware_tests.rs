//! Unit tests for authentication middleware
//!
//! Tests cover:
//! - Token extraction from cookie and Authorization header
//! - Role guards on AuthUser
//! - Error responses
//! - Requests rejected before any database access

#[cfg(test)]
mod tests {
    use super::super::middleware::*;
    use crate::models::UserRow;
    use axum::{
        body::Body,
        extract::Request,
        http::{header, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use mcd_shared::Role;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    fn user_with_role(role: Role) -> UserRow {
        UserRow {
            user_id: "user_000000000001".to_string(),
            email: "someone@example.com".to_string(),
            name: "Someone".to_string(),
            picture: None,
            role: role.as_str().to_string(),
            linked_coach_id: None,
            organization_id: None,
            password_hash: None,
            auth_provider: "email".to_string(),
            marketing_opt_in: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn auth_user(role: Role) -> AuthUser {
        AuthUser {
            user: user_with_role(role),
            impersonated_by: None,
            token_hash: "hash".to_string(),
        }
    }

    fn request_with(name: header::HeaderName, value: &str) -> Request {
        Request::builder()
            .uri("/")
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_token_from_cookie() {
        let req = request_with(header::COOKIE, "theme=dark; session_token=abc123");
        assert_eq!(extract_session_token(&req).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_token_from_bearer_header() {
        let req = request_with(header::AUTHORIZATION, "Bearer xyz789");
        assert_eq!(extract_session_token(&req).as_deref(), Some("xyz789"));
    }

    #[test]
    fn test_cookie_preferred_over_header() {
        let req = Request::builder()
            .uri("/")
            .header(header::COOKIE, "session_token=from-cookie")
            .header(header::AUTHORIZATION, "Bearer from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_session_token(&req).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_no_token() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert!(extract_session_token(&req).is_none());
    }

    #[test]
    fn test_non_bearer_scheme_ignored() {
        let req = request_with(header::AUTHORIZATION, "Basic dXNlcjpwYXNz");
        assert!(extract_session_token(&req).is_none());
    }

    #[test]
    fn test_staff_guard() {
        assert!(auth_user(Role::Admin).require_staff().is_ok());
        assert!(auth_user(Role::CoachDeveloper).require_staff().is_ok());
        let err = auth_user(Role::Coach).require_staff().unwrap_err();
        assert_eq!(err.to_string(), "Coach Developer role required");
    }

    #[test]
    fn test_admin_guard() {
        assert!(auth_user(Role::Admin).require_admin().is_ok());
        let err = auth_user(Role::CoachDeveloper).require_admin().unwrap_err();
        assert_eq!(err.to_string(), "Admin access required");
    }

    #[test]
    fn test_coach_guard() {
        assert!(auth_user(Role::Coach).require_coach().is_ok());
        let err = auth_user(Role::Admin).require_coach().unwrap_err();
        assert_eq!(err.to_string(), "Coach access required");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_auth_response() {
        let response = AuthError::MissingAuth.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["detail"], "Not authenticated");
        assert_eq!(body["code"], 401);
    }

    #[tokio::test]
    async fn test_require_auth_rejects_anonymous_request() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/mcd_test")
            .unwrap();
        let app = Router::new()
            .route("/protected", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(
                AuthState { pool },
                require_auth,
            ));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
