//! Billing error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe is not configured: {0}")]
    NotConfigured(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Webhook event not supported: {0}")]
    WebhookEventNotSupported(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("No price configured for tier {0}")]
    PriceNotConfigured(String),

    #[error("Invalid tier: {0}")]
    InvalidTier(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
