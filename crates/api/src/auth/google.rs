//! Google sign-in session exchange
//!
//! The browser completes Google OAuth with a hosted auth service and hands us
//! a one-time `session_id`. We trade it for the user's profile and a session
//! token by calling the service with an `X-Session-ID` header.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSessionData {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    pub session_token: String,
}

#[derive(Clone)]
pub struct GoogleSessionClient {
    http: Client,
    session_url: String,
}

impl GoogleSessionClient {
    pub fn new(http: Client, session_url: impl Into<String>) -> Self {
        Self {
            http,
            session_url: session_url.into(),
        }
    }

    pub async fn exchange(&self, session_id: &str) -> ApiResult<GoogleSessionData> {
        let response = self
            .http
            .get(&self.session_url)
            .header("X-Session-ID", session_id)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Google session exchange request failed");
                ApiError::ExternalService("Auth service unavailable".to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Google session exchange rejected");
            return Err(ApiError::Unauthorized("Invalid session".to_string()));
        }

        response.json::<GoogleSessionData>().await.map_err(|e| {
            tracing::error!(error = %e, "Google session exchange returned malformed data");
            ApiError::Unauthorized("Invalid session".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exchange_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/session-data")
            .match_header("X-Session-ID", "sess_abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"g1","email":"coach@example.com","name":"Sam Coach","picture":null,"session_token":"tok_1"}"#,
            )
            .create_async()
            .await;

        let client =
            GoogleSessionClient::new(Client::new(), format!("{}/session-data", server.url()));
        let data = client.exchange("sess_abc").await.unwrap();

        assert_eq!(data.email, "coach@example.com");
        assert_eq!(data.session_token, "tok_1");
        assert!(data.picture.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_rejected_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/session-data")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let client =
            GoogleSessionClient::new(Client::new(), format!("{}/session-data", server.url()));
        let err = client.exchange("bad").await.unwrap_err();

        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "Invalid session"));
    }
}
