//! Application state

use reqwest::Client;
use sqlx::PgPool;
#[cfg(feature = "billing")]
use std::sync::Arc;

use crate::{
    auth::{AuthState, GoogleSessionClient},
    config::Config,
    email::EmailService,
    llm::LlmClient,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub email: EmailService,
    pub llm: LlmClient,
    pub google: GoogleSessionClient,
    /// Billing service (only available when billing feature is enabled)
    #[cfg(feature = "billing")]
    pub billing: Option<Arc<mcd_billing::BillingService>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        // Try to initialize billing if Stripe env vars are set (only when feature is enabled)
        #[cfg(feature = "billing")]
        let billing = if config.enable_billing {
            match mcd_billing::BillingService::from_env(pool.clone()) {
                Ok(svc) => {
                    tracing::info!("Stripe billing service initialized");
                    Some(Arc::new(svc))
                }
                Err(e) => {
                    tracing::warn!("Stripe billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        #[cfg(not(feature = "billing"))]
        tracing::info!("Billing feature not compiled in (build without --features billing)");

        #[allow(unused_mut)]
        let mut state = Self::without_billing(pool, config);
        #[cfg(feature = "billing")]
        {
            state.billing = billing;
        }
        state
    }

    /// State with outbound clients built from config but no Stripe service
    pub fn without_billing(pool: PgPool, config: Config) -> Self {
        let http_client = Client::new();

        let email = EmailService::from_config(http_client.clone(), &config);
        if email.is_enabled() {
            tracing::info!(sender = %config.sender_email, "Email delivery enabled");
        } else {
            tracing::warn!("Email delivery not configured (missing RESEND_API_KEY)");
        }

        let llm = LlmClient::from_config(http_client.clone(), &config);
        if !llm.is_enabled() {
            tracing::warn!("AI summaries not configured (missing LLM_API_KEY)");
        }

        let google = GoogleSessionClient::new(http_client, config.google_session_url.clone());

        Self {
            pool,
            config,
            email,
            llm,
            google,
            #[cfg(feature = "billing")]
            billing: None,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            pool: self.pool.clone(),
        }
    }

    pub fn billing_configured(&self) -> bool {
        #[cfg(feature = "billing")]
        {
            self.billing.is_some()
        }
        #[cfg(not(feature = "billing"))]
        {
            false
        }
    }

    /// Get billing service reference
    #[cfg(feature = "billing")]
    pub fn billing_service(&self) -> Option<&Arc<mcd_billing::BillingService>> {
        self.billing.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_state(config: Config) -> AppState {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        AppState::without_billing(pool, config)
    }

    #[tokio::test]
    async fn test_outbound_clients_follow_config() {
        let state = build_state(Config::for_tests());
        assert!(!state.email.is_enabled());
        assert!(!state.llm.is_enabled());
        assert!(!state.billing_configured());

        let mut config = Config::for_tests();
        config.resend_api_key = Some("re_test".to_string());
        config.llm_api_key = Some("sk-test".to_string());
        let state = build_state(config);
        assert!(state.email.is_enabled());
        assert!(state.llm.is_enabled());
    }
}
