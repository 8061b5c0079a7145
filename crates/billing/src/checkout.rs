//! Stripe Checkout for plan upgrades

use std::collections::HashMap;

use mcd_shared::SubscriptionTier;
use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CreateCustomer, Customer, CustomerId,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

pub struct CheckoutService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Start a subscription-mode Checkout session for `tier`
    ///
    /// `org_id` and `tier` travel in the session and subscription metadata so
    /// the webhook can attribute the payment.
    pub async fn create_checkout_session(
        &self,
        org_id: &str,
        tier: SubscriptionTier,
        email: &str,
        club_name: Option<&str>,
    ) -> BillingResult<CheckoutResponse> {
        if tier == SubscriptionTier::Individual {
            return Err(BillingError::InvalidTier(
                "individual plan does not require checkout".to_string(),
            ));
        }

        let price_id = self
            .stripe
            .config()
            .prices
            .for_tier(tier)
            .ok_or_else(|| BillingError::PriceNotConfigured(tier.to_string()))?
            .to_string();

        let customer_id = self.get_or_create_customer(org_id, email, club_name).await?;

        let success_url = format!(
            "{}/settings?checkout=success&session_id={{CHECKOUT_SESSION_ID}}",
            self.stripe.config().app_url
        );
        let cancel_url = format!("{}/settings?checkout=cancelled", self.stripe.config().app_url);

        let mut metadata = HashMap::new();
        metadata.insert("org_id".to_string(), org_id.to_string());
        metadata.insert("tier".to_string(), tier.to_string());

        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(customer_id);
        params.client_reference_id = Some(org_id);
        params.metadata = Some(metadata.clone());
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(metadata),
            ..Default::default()
        });

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        let url = session
            .url
            .ok_or_else(|| BillingError::StripeApi("Checkout session has no URL".to_string()))?;

        tracing::info!(
            org_id = %org_id,
            tier = %tier,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            url,
            session_id: session.id.to_string(),
        })
    }

    async fn get_or_create_customer(
        &self,
        org_id: &str,
        email: &str,
        club_name: Option<&str>,
    ) -> BillingResult<CustomerId> {
        let existing: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM organizations WHERE org_id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            None => return Err(BillingError::OrganizationNotFound(org_id.to_string())),
            Some((Some(customer_id),)) => {
                return customer_id
                    .parse::<CustomerId>()
                    .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)));
            }
            Some((None,)) => {}
        }

        let mut metadata = HashMap::new();
        metadata.insert("org_id".to_string(), org_id.to_string());

        let params = CreateCustomer {
            email: Some(email),
            name: club_name,
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        sqlx::query(
            "UPDATE organizations SET stripe_customer_id = $1, updated_at = NOW() WHERE org_id = $2",
        )
        .bind(customer.id.as_str())
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            org_id = %org_id,
            customer_id = %customer.id,
            "Created new Stripe customer"
        );

        Ok(customer.id)
    }
}
