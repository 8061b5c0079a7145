//! Subscription state kept in sync with Stripe
//!
//! The `subscriptions` table is the source of truth for seat limits. Stripe
//! events move an organization between tiers; everything else reads the row.

use mcd_shared::SubscriptionTier;
use sqlx::PgPool;
use stripe::{Subscription, SubscriptionStatus as StripeSubStatus};
use time::OffsetDateTime;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
}

/// Map a Stripe subscription status onto the string stored in `subscriptions.status`
pub fn status_str(status: &StripeSubStatus) -> &'static str {
    match status {
        StripeSubStatus::Active => "active",
        StripeSubStatus::PastDue => "past_due",
        StripeSubStatus::Canceled => "canceled",
        StripeSubStatus::Unpaid => "unpaid",
        StripeSubStatus::Trialing => "trialing",
        StripeSubStatus::Incomplete => "incomplete",
        StripeSubStatus::IncompleteExpired => "incomplete_expired",
        StripeSubStatus::Paused => "paused",
    }
}

/// Whether a status still entitles the organization to its paid tier
pub fn is_entitled(status: &str) -> bool {
    matches!(status, "active" | "trialing" | "past_due")
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Put an organization on `tier`, creating the subscription row if needed
    pub async fn activate_tier(
        &self,
        org_id: &str,
        tier: SubscriptionTier,
        stripe_subscription_id: Option<&str>,
        stripe_customer_id: Option<&str>,
    ) -> BillingResult<()> {
        let limits = tier.limits();

        let org_exists: Option<(String,)> =
            sqlx::query_as("SELECT org_id FROM organizations WHERE org_id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;
        if org_exists.is_none() {
            return Err(BillingError::OrganizationNotFound(org_id.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                org_id, tier, coaches_limit, admins_limit, status,
                stripe_subscription_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, 'active', $5, NOW(), NOW())
            ON CONFLICT (org_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                coaches_limit = EXCLUDED.coaches_limit,
                admins_limit = EXCLUDED.admins_limit,
                status = 'active',
                stripe_subscription_id = COALESCE(EXCLUDED.stripe_subscription_id, subscriptions.stripe_subscription_id),
                updated_at = NOW()
            "#,
        )
        .bind(org_id)
        .bind(tier.as_str())
        .bind(limits.coaches)
        .bind(limits.admins)
        .bind(stripe_subscription_id)
        .execute(&self.pool)
        .await?;

        if let Some(customer_id) = stripe_customer_id {
            sqlx::query(
                "UPDATE organizations SET stripe_customer_id = $1, updated_at = NOW() WHERE org_id = $2",
            )
            .bind(customer_id)
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        }

        tracing::info!(
            org_id = %org_id,
            tier = %tier,
            stripe_subscription_id = ?stripe_subscription_id,
            "Subscription tier activated"
        );

        Ok(())
    }

    /// Mirror a Stripe subscription object into the local row
    ///
    /// The organization is resolved from `metadata.org_id` first and then from
    /// the stored subscription id. A price that maps to a known tier also moves
    /// the organization to that tier.
    pub async fn sync_subscription_to_db(&self, subscription: &Subscription) -> BillingResult<()> {
        let org_id = match subscription.metadata.get("org_id") {
            Some(org_id) => org_id.clone(),
            None => self
                .org_for_subscription(subscription.id.as_str())
                .await?
                .ok_or_else(|| {
                    BillingError::Internal(format!(
                        "No organization for subscription {}",
                        subscription.id
                    ))
                })?,
        };

        let status = status_str(&subscription.status);
        let expires_at = OffsetDateTime::from_unix_timestamp(subscription.current_period_end).ok();

        let tier = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .and_then(|price| self.stripe.config().prices.tier_for_price(price.id.as_str()));

        match tier {
            Some(tier) if is_entitled(status) => {
                let limits = tier.limits();
                sqlx::query(
                    r#"
                    INSERT INTO subscriptions (
                        org_id, tier, coaches_limit, admins_limit, status,
                        stripe_subscription_id, expires_at, created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
                    ON CONFLICT (org_id) DO UPDATE SET
                        tier = EXCLUDED.tier,
                        coaches_limit = EXCLUDED.coaches_limit,
                        admins_limit = EXCLUDED.admins_limit,
                        status = EXCLUDED.status,
                        stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                        expires_at = EXCLUDED.expires_at,
                        updated_at = NOW()
                    "#,
                )
                .bind(&org_id)
                .bind(tier.as_str())
                .bind(limits.coaches)
                .bind(limits.admins)
                .bind(status)
                .bind(subscription.id.as_str())
                .bind(expires_at)
                .execute(&self.pool)
                .await?;
            }
            _ => {
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET status = $1, expires_at = $2, updated_at = NOW()
                    WHERE org_id = $3
                    "#,
                )
                .bind(status)
                .bind(expires_at)
                .bind(&org_id)
                .execute(&self.pool)
                .await?;
            }
        }

        tracing::info!(
            org_id = %org_id,
            subscription_id = %subscription.id,
            status = %status,
            tier = ?tier,
            "Synced subscription from Stripe"
        );

        Ok(())
    }

    /// Drop an organization back to the free individual plan
    pub async fn revert_to_individual(&self, stripe_subscription_id: &str) -> BillingResult<()> {
        let limits = SubscriptionTier::Individual.limits();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET tier = 'individual',
                coaches_limit = $1,
                admins_limit = $2,
                status = 'canceled',
                updated_at = NOW()
            WHERE stripe_subscription_id = $3
            "#,
        )
        .bind(limits.coaches)
        .bind(limits.admins)
        .bind(stripe_subscription_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                subscription_id = %stripe_subscription_id,
                "Subscription deleted in Stripe but no local row matched"
            );
        } else {
            tracing::info!(
                subscription_id = %stripe_subscription_id,
                "Organization reverted to individual plan"
            );
        }

        Ok(())
    }

    async fn org_for_subscription(&self, stripe_subscription_id: &str) -> BillingResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT org_id FROM subscriptions WHERE stripe_subscription_id = $1")
                .bind(stripe_subscription_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(org_id,)| org_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(status_str(&StripeSubStatus::Active), "active");
        assert_eq!(status_str(&StripeSubStatus::PastDue), "past_due");
        assert_eq!(
            status_str(&StripeSubStatus::IncompleteExpired),
            "incomplete_expired"
        );
    }

    #[test]
    fn test_entitlement() {
        assert!(is_entitled("active"));
        assert!(is_entitled("trialing"));
        assert!(is_entitled("past_due"));
        assert!(!is_entitled("canceled"));
        assert!(!is_entitled("unpaid"));
        assert!(!is_entitled("incomplete"));
    }
}
