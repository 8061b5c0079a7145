//! Transactional email via Resend
//!
//! Sends invitation and password reset emails. Transient failures are retried
//! with exponential backoff (2s, 4s); errors that will not go away on their
//! own (bad API key, unverified domain) fail immediately.

use std::time::Duration;

use mcd_shared::Role;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use crate::config::Config;

const MAX_ATTEMPTS: usize = 3;

const PERMANENT_ERROR_MARKERS: &[&str] = &[
    "api_key",
    "unauthorized",
    "forbidden",
    "verify",
    "domain",
    "testing emails",
];

#[derive(Debug, Clone, thiserror::Error)]
pub enum EmailError {
    #[error("Email service not configured")]
    NotConfigured,
    #[error("{0}")]
    Permanent(String),
    #[error("{0}")]
    Transient(String),
}

impl EmailError {
    fn is_transient(&self) -> bool {
        matches!(self, EmailError::Transient(_))
    }

    /// Classify a failed Resend response
    fn from_response(status: StatusCode, body: &str) -> Self {
        let message = format!("Resend returned {}: {}", status.as_u16(), body);
        let lowered = body.to_lowercase();
        let permanent = matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY
        ) || PERMANENT_ERROR_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker));

        if permanent {
            EmailError::Permanent(message)
        } else {
            EmailError::Transient(message)
        }
    }
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ResendResponse {
    pub id: String,
}

#[derive(Clone)]
pub struct EmailService {
    http: Client,
    api_key: Option<String>,
    api_url: String,
    sender: String,
    app_url: String,
    retry_base: Duration,
}

impl EmailService {
    pub fn from_config(http: Client, config: &Config) -> Self {
        Self {
            http,
            api_key: config.resend_api_key.clone(),
            api_url: config.resend_api_url.trim_end_matches('/').to_string(),
            sender: config.sender_email.clone(),
            app_url: config.app_url.clone(),
            retry_base: Duration::from_secs(1),
        }
    }

    /// Shorten the backoff between attempts (tests)
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub async fn send_password_reset(
        &self,
        to: &str,
        reset_token: &str,
        user_name: &str,
    ) -> Result<ResendResponse, EmailError> {
        let link = format!("{}/reset-password?token={}", self.app_url, reset_token);
        let html = password_reset_html(&link, user_name);
        self.send(to, "Reset Your Password - My Coach Developer", &html, "password reset")
            .await
    }

    pub async fn send_invite(
        &self,
        to: &str,
        inviter_name: &str,
        role: Role,
        invite_id: &str,
        invitee_name: Option<&str>,
    ) -> Result<ResendResponse, EmailError> {
        let link = format!("{}/register/{}", self.app_url, invite_id);
        let html = invite_html(&link, inviter_name, role, invitee_name);
        self.send(to, "You're invited to My Coach Developer", &html, "invite")
            .await
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        email_type: &'static str,
    ) -> Result<ResendResponse, EmailError> {
        let api_key = self.api_key.as_deref().ok_or(EmailError::NotConfigured)?;

        // 2^n * base: 2s then 4s with the default base
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.retry_base.as_millis() as u64)
            .take(MAX_ATTEMPTS - 1);

        let mut attempt = 0usize;
        let result = RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                tracing::info!(email_type, to = %to, attempt, "Sending email");
                self.send_once(api_key, to, subject, html)
            },
            |e: &EmailError| {
                tracing::warn!(email_type, error = %e, "Email attempt failed");
                e.is_transient()
            },
        )
        .await;

        match &result {
            Ok(resp) => tracing::info!(email_type, to = %to, id = %resp.id, "Email sent"),
            Err(e) => tracing::error!(email_type, to = %to, error = %e, "Email delivery failed"),
        }

        result
    }

    async fn send_once(
        &self,
        api_key: &str,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<ResendResponse, EmailError> {
        let response = self
            .http
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(api_key)
            .json(&ResendRequest {
                from: &self.sender,
                to: vec![to],
                subject,
                html,
            })
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| EmailError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::from_response(status, &body));
        }

        response
            .json::<ResendResponse>()
            .await
            .map_err(|e| EmailError::Transient(format!("Malformed Resend response: {}", e)))
    }
}

/// Minimal HTML escaping for names interpolated into templates
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn button(link: &str, label: &str) -> String {
    format!(
        r#"<div style="text-align: center; margin: 30px 0;">
            <a href="{link}"
               style="background-color: #1e293b; color: white; padding: 12px 24px;
                      text-decoration: none; border-radius: 6px; display: inline-block;">
                {label}
            </a>
        </div>
        <p>Or copy and paste this link into your browser:</p>
        <p style="color: #64748b; word-break: break-all;">{link}</p>"#
    )
}

pub fn password_reset_html(reset_link: &str, user_name: &str) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
        <h2 style="color: #1e293b;">Reset Your Password</h2>
        <p>Hi {name},</p>
        <p>We received a request to reset your password for your My Coach Developer account.</p>
        <p>Click the button below to reset your password:</p>
        {button}
        <p style="color: #64748b; font-size: 14px; margin-top: 30px;">
            This link will expire in 1 hour. If you didn't request a password reset,
            you can safely ignore this email.
        </p>
    </div>"#,
        name = escape_html(user_name),
        button = button(reset_link, "Reset Password"),
    )
}

pub fn invite_html(
    registration_link: &str,
    inviter_name: &str,
    role: Role,
    invitee_name: Option<&str>,
) -> String {
    let greeting = match invitee_name.filter(|n| !n.trim().is_empty()) {
        Some(name) => format!("Hi {},", escape_html(name)),
        None => "Hi there,".to_string(),
    };

    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
        <h2 style="color: #1e293b;">You're Invited to My Coach Developer</h2>
        <p>{greeting}</p>
        <p><strong>{inviter}</strong> has invited you to join My Coach Developer as a <strong>{role}</strong>.</p>
        <p>My Coach Developer is a coaching observation app that helps track and analyze coaching sessions.</p>
        {button}
        <p style="color: #64748b; font-size: 14px; margin-top: 30px;">
            This invitation link is unique to you and can only be used once.
        </p>
    </div>"#,
        greeting = greeting,
        inviter = escape_html(inviter_name),
        role = role.display_name(),
        button = button(registration_link, "Complete Your Registration"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(url: &str, api_key: Option<&str>) -> EmailService {
        let mut config = Config::for_tests();
        config.resend_api_url = url.to_string();
        config.resend_api_key = api_key.map(String::from);
        config.app_url = "https://app.example.com".to_string();
        EmailService::from_config(Client::new(), &config).with_retry_base(Duration::from_millis(1))
    }

    #[test]
    fn test_invite_html_contents() {
        let html = invite_html(
            "https://app.example.com/register/inv_1",
            "Alex Developer",
            Role::CoachDeveloper,
            Some("Jamie"),
        );
        assert!(html.contains("Hi Jamie,"));
        assert!(html.contains("<strong>Alex Developer</strong>"));
        assert!(html.contains("<strong>Coach Developer</strong>"));
        assert!(html.contains("https://app.example.com/register/inv_1"));
    }

    #[test]
    fn test_invite_html_without_name() {
        let html = invite_html("link", "Alex", Role::Coach, None);
        assert!(html.contains("Hi there,"));
        assert!(html.contains("<strong>Coach</strong>"));
    }

    #[test]
    fn test_names_are_escaped() {
        let html = password_reset_html("link", "<script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_permanent_classification() {
        assert!(!EmailError::from_response(StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!EmailError::from_response(
            StatusCode::BAD_REQUEST,
            "You can only send testing emails to your own address"
        )
        .is_transient());
        assert!(EmailError::from_response(StatusCode::INTERNAL_SERVER_ERROR, "oops").is_transient());
    }

    #[tokio::test]
    async fn test_not_configured() {
        let svc = service("http://127.0.0.1:9", None);
        assert!(!svc.is_enabled());
        let err = svc
            .send_password_reset("a@example.com", "tok", "A")
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::NotConfigured));
    }

    #[tokio::test]
    async fn test_sends_reset_email() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer re_test")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"to":["coach@example.com"],"subject":"Reset Your Password - My Coach Developer"}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"id":"email_1"}"#)
            .create_async()
            .await;

        let svc = service(&server.url(), Some("re_test"));
        let resp = svc
            .send_password_reset("coach@example.com", "tok123", "Coach")
            .await
            .unwrap();

        assert_eq!(resp.id, "email_1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .with_status(500)
            .with_body("temporarily unavailable")
            .expect(3)
            .create_async()
            .await;

        let svc = service(&server.url(), Some("re_test"));
        let err = svc
            .send_invite("x@example.com", "Alex", Role::Coach, "inv_1", None)
            .await
            .unwrap_err();

        assert!(matches!(err, EmailError::Transient(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .with_status(403)
            .with_body(r#"{"message":"The domain is not verified"}"#)
            .expect(1)
            .create_async()
            .await;

        let svc = service(&server.url(), Some("re_test"));
        let err = svc
            .send_invite("x@example.com", "Alex", Role::Coach, "inv_1", None)
            .await
            .unwrap_err();

        assert!(matches!(err, EmailError::Permanent(_)));
        mock.assert_async().await;
    }
}
