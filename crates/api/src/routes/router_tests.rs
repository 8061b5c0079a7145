//! Router tests that run without a database
//!
//! The pool connects lazily, so every request here must be answered before
//! a query is issued: public endpoints that only read config, auth rejection
//! on protected routes, and input validation that runs ahead of the first
//! lookup.

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{config::Config, routes::create_router, state::AppState};

    fn app() -> Router {
        let config = Config::for_tests();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        create_router(AppState::without_billing(pool, config))
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_greets() {
        let (status, body) = send(get("/api/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Hello World");
    }

    #[tokio::test]
    async fn test_config_check_reports_integrations_without_secrets() {
        let (status, body) = send(get("/api/config-check")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sender_email"], "noreply@example.com");
        assert_eq!(body["email_configured"], false);
        assert_eq!(body["llm_configured"], false);
        assert_eq!(body["billing_configured"], false);
        assert!(body.get("resend_api_key").is_none());
    }

    #[tokio::test]
    async fn test_protected_routes_require_session() {
        let requests = vec![
            get("/api/auth/me"),
            get("/api/coaches"),
            get("/api/observations"),
            get("/api/coach/dashboard"),
            get("/api/admin/check"),
            get("/api/billing/status"),
            post_json("/api/generate-summary", "{}"),
            post_json("/api/invites", r#"{"email": "a@b.co"}"#),
        ];

        for request in requests {
            let uri = request.uri().to_string();
            let (status, body) = send(request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(body["detail"], "Not authenticated", "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_bearer_token_must_be_non_empty() {
        let request = Request::builder()
            .uri("/api/auth/me")
            .header(header::AUTHORIZATION, "Bearer ")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signup_rejects_bad_email_before_lookup() {
        let (status, body) = send(post_json(
            "/api/auth/signup",
            r#"{"email": "not-an-email", "password": "longenough1", "name": "Jo"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Invalid email format");
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn test_register_invite_requires_fields() {
        let (status, body) = send(post_json(
            "/api/auth/register-invite",
            r#"{"invite_id": "inv_1", "password": "", "name": "Jo"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing required fields");
    }

    #[tokio::test]
    async fn test_status_check_is_public_and_validated() {
        let (status, body) = send(post_json("/api/status", r#"{"client_name": "   "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "client_name is required");

        let (status, _) = send(post_json("/api/status", "{}")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_webhook_without_billing_is_unavailable() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/billing/webhook")
            .header("stripe-signature", "t=1,v1=00")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["detail"], "Billing is not configured");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (status, _) = send(get("/api/does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
