//! Subscription plan lookup
//!
//! Works from the database alone so plan limits apply whether or not Stripe
//! is configured. Stripe webhooks write the `subscriptions` rows this reads.

use mcd_shared::{SubscriptionTier, UNLIMITED_LIMITS};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::config::Config;
use crate::error::ApiResult;
use crate::models::{OrganizationRow, UserRow};

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub tier: String,
    pub coaches_limit: i64,
    pub admins_limit: i64,
    pub status: String,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanInfo {
    pub tier: SubscriptionTier,
    pub is_bootstrapped: bool,
    pub coaches_limit: i64,
    pub admins_limit: i64,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl PlanInfo {
    fn for_tier(tier: SubscriptionTier) -> Self {
        let limits = tier.limits();
        Self {
            tier,
            is_bootstrapped: false,
            coaches_limit: limits.coaches,
            admins_limit: limits.admins,
            expires_at: None,
        }
    }
}

/// Bootstrapped organizations report club with unlimited seats; otherwise the
/// stored subscription wins, falling back to the individual tier
pub fn resolve_plan(bootstrapped: bool, stored: Option<SubscriptionRow>) -> PlanInfo {
    if bootstrapped {
        return PlanInfo {
            tier: SubscriptionTier::Club,
            is_bootstrapped: true,
            coaches_limit: UNLIMITED_LIMITS.coaches,
            admins_limit: UNLIMITED_LIMITS.admins,
            expires_at: None,
        };
    }

    match stored {
        Some(row) => PlanInfo {
            tier: row.tier.parse().unwrap_or_default(),
            is_bootstrapped: false,
            coaches_limit: row.coaches_limit,
            admins_limit: row.admins_limit,
            expires_at: row.expires_at,
        },
        None => PlanInfo::for_tier(SubscriptionTier::Individual),
    }
}

/// The organization whose plan governs a coach developer: the one they own,
/// else the one they belong to
pub async fn billing_organization(pool: &PgPool, user: &UserRow) -> ApiResult<Option<String>> {
    if let Some(org) = OrganizationRow::find_by_owner(pool, &user.user_id).await? {
        return Ok(Some(org.org_id));
    }
    Ok(user.organization_id.clone())
}

pub async fn organization_plan(
    pool: &PgPool,
    config: &Config,
    org_id: Option<&str>,
) -> ApiResult<PlanInfo> {
    let Some(org_id) = org_id else {
        return Ok(resolve_plan(false, None));
    };

    if config.is_bootstrapped(org_id) {
        return Ok(resolve_plan(true, None));
    }

    let stored = sqlx::query_as::<_, SubscriptionRow>(
        "SELECT tier, coaches_limit, admins_limit, status, expires_at \
         FROM subscriptions WHERE org_id = $1",
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await?;

    Ok(resolve_plan(false, stored))
}

/// Plan for the organization a coach developer manages
pub async fn plan_for_user(pool: &PgPool, config: &Config, user: &UserRow) -> ApiResult<PlanInfo> {
    let org_id = billing_organization(pool, user).await?;
    organization_plan(pool, config, org_id.as_deref()).await
}

/// Coaches counted against a plan: profiles the user created or that belong
/// to the organization
pub async fn coach_count(pool: &PgPool, user_id: &str, org_id: Option<&str>) -> ApiResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM coaches WHERE created_by = $1 \
         OR ($2::TEXT IS NOT NULL AND organization_id = $2)",
    )
    .bind(user_id)
    .bind(org_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Coach developers and admins in the organization, never less than the
/// caller themself
pub async fn admin_count(pool: &PgPool, org_id: Option<&str>) -> ApiResult<i64> {
    let Some(org_id) = org_id else {
        return Ok(1);
    };
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM users WHERE organization_id = $1 \
         AND role IN ('coach_developer', 'admin')",
    )
    .bind(org_id)
    .fetch_one(pool)
    .await?;
    Ok(count.max(1))
}

impl PlanInfo {
    pub fn has_room_for_coach(&self, current: i64) -> bool {
        current < self.coaches_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrapped_plan() {
        let plan = resolve_plan(true, None);
        assert_eq!(plan.tier, SubscriptionTier::Club);
        assert!(plan.is_bootstrapped);
        assert_eq!(plan.coaches_limit, 999);
        assert_eq!(plan.admins_limit, 999);
    }

    #[test]
    fn test_default_plan_is_individual() {
        let plan = resolve_plan(false, None);
        assert_eq!(plan.tier, SubscriptionTier::Individual);
        assert_eq!(plan.coaches_limit, 5);
        assert_eq!(plan.admins_limit, 1);
        assert!(plan.expires_at.is_none());
    }

    #[test]
    fn test_stored_subscription_wins() {
        let plan = resolve_plan(
            false,
            Some(SubscriptionRow {
                tier: "academy".to_string(),
                coaches_limit: 999,
                admins_limit: 999,
                status: "active".to_string(),
                expires_at: None,
            }),
        );
        assert_eq!(plan.tier, SubscriptionTier::Academy);
        assert_eq!(plan.coaches_limit, 999);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(resolve_plan(false, None)).unwrap();
        assert_eq!(json["tier"], "individual");
        assert_eq!(json["is_bootstrapped"], false);
        assert!(json.get("expires_at").is_none());
    }

    #[test]
    fn test_coach_capacity() {
        let plan = resolve_plan(false, None);
        assert!(plan.has_room_for_coach(4));
        assert!(!plan.has_room_for_coach(5));
        assert!(resolve_plan(true, None).has_room_for_coach(500));
    }
}
