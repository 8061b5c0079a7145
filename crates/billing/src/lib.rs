// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries Stripe error text
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! My Coach Developer Billing Module
//!
//! Stripe integration for club subscriptions.
//!
//! ## Features
//!
//! - **Checkout**: Subscription-mode Checkout sessions for the paid tiers
//! - **Subscriptions**: Seat limits per tier, synced from Stripe
//! - **Webhooks**: Signature verification and idempotent event handling

pub mod checkout;
pub mod client;
pub mod error;
pub mod subscriptions;
pub mod webhooks;


// Checkout
pub use checkout::{CheckoutResponse, CheckoutService};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Subscriptions
pub use subscriptions::SubscriptionService;

// Webhooks
pub use webhooks::{verify_signature, WebhookHandler};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_client(StripeClient::new(config), pool)
    }

    fn with_client(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool),
        }
    }
}
