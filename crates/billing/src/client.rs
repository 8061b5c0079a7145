//! Stripe client wrapper

use std::sync::Arc;

use mcd_shared::SubscriptionTier;

use crate::error::{BillingError, BillingResult};

/// Stripe price ids for the paid tiers
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub club: Option<String>,
    pub academy: Option<String>,
}

impl PriceIds {
    pub fn for_tier(&self, tier: SubscriptionTier) -> Option<&str> {
        match tier {
            SubscriptionTier::Individual => None,
            SubscriptionTier::Club => self.club.as_deref(),
            SubscriptionTier::Academy => self.academy.as_deref(),
        }
    }

    /// Reverse lookup used when a subscription changes plan on the Stripe side
    pub fn tier_for_price(&self, price_id: &str) -> Option<SubscriptionTier> {
        if self.club.as_deref() == Some(price_id) {
            Some(SubscriptionTier::Club)
        } else if self.academy.as_deref() == Some(price_id) {
            Some(SubscriptionTier::Academy)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub prices: PriceIds,
    /// Where Checkout sends the browser afterwards
    pub app_url: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::NotConfigured("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| {
            BillingError::NotConfigured("STRIPE_WEBHOOK_SECRET not set".to_string())
        })?;

        let prices = PriceIds {
            club: std::env::var("STRIPE_PRICE_CLUB").ok().filter(|s| !s.is_empty()),
            academy: std::env::var("STRIPE_PRICE_ACADEMY")
                .ok()
                .filter(|s| !s.is_empty()),
        };

        let app_url =
            std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
            prices,
            app_url,
        })
    }
}

/// Cheap-to-clone handle to the Stripe API
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self {
            inner,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices() -> PriceIds {
        PriceIds {
            club: Some("price_club".to_string()),
            academy: Some("price_academy".to_string()),
        }
    }

    #[test]
    fn test_price_for_tier() {
        let prices = prices();
        assert_eq!(prices.for_tier(SubscriptionTier::Club), Some("price_club"));
        assert_eq!(
            prices.for_tier(SubscriptionTier::Academy),
            Some("price_academy")
        );
        assert_eq!(prices.for_tier(SubscriptionTier::Individual), None);
    }

    #[test]
    fn test_tier_for_price() {
        let prices = prices();
        assert_eq!(
            prices.tier_for_price("price_academy"),
            Some(SubscriptionTier::Academy)
        );
        assert_eq!(prices.tier_for_price("price_unknown"), None);
    }

    #[test]
    fn test_missing_prices() {
        let prices = PriceIds::default();
        assert_eq!(prices.for_tier(SubscriptionTier::Club), None);
        assert_eq!(prices.tier_for_price(""), None);
    }
}
