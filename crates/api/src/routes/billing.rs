//! Plan status, Stripe Checkout and Stripe webhooks

use axum::{extract::State, http::HeaderMap, Extension, Json};
use mcd_shared::SubscriptionTier;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    plans,
    state::AppState,
};

const BILLING_NOT_CONFIGURED: &str = "Billing is not configured";

#[derive(Debug, Serialize)]
pub struct BillingStatus {
    pub plan: SubscriptionTier,
    pub coach_limit: i64,
    pub admin_limit: i64,
    pub current_coaches: i64,
    pub current_admins: i64,
    pub can_upgrade: bool,
}

pub async fn status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<BillingStatus>> {
    auth_user.require_staff()?;

    let org_id = plans::billing_organization(&state.pool, &auth_user.user).await?;
    let plan = plans::organization_plan(&state.pool, &state.config, org_id.as_deref()).await?;
    let current_coaches =
        plans::coach_count(&state.pool, auth_user.user_id(), org_id.as_deref()).await?;
    let current_admins = plans::admin_count(&state.pool, org_id.as_deref()).await?;

    Ok(Json(BillingStatus {
        plan: plan.tier,
        coach_limit: plan.coaches_limit,
        admin_limit: plan.admins_limit,
        current_coaches,
        current_admins,
        can_upgrade: !plan.is_bootstrapped && plan.tier.can_upgrade(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub tier: SubscriptionTier,
}

#[cfg(feature = "billing")]
pub async fn checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<mcd_billing::CheckoutResponse>> {
    auth_user.require_staff()?;

    let billing = state
        .billing_service()
        .ok_or_else(|| ApiError::ServiceUnavailable(BILLING_NOT_CONFIGURED.to_string()))?;

    let org = match plans::billing_organization(&state.pool, &auth_user.user).await? {
        Some(org_id) => crate::models::OrganizationRow::find_by_id(&state.pool, &org_id).await?,
        None => None,
    };
    let org = match org {
        Some(org) => org,
        None => super::organization::find_or_create_owned(&state.pool, auth_user.user_id()).await?,
    };

    let session = billing
        .checkout
        .create_checkout_session(
            &org.org_id,
            req.tier,
            &auth_user.user.email,
            org.club_name.as_deref(),
        )
        .await?;

    tracing::info!(org_id = %org.org_id, tier = %req.tier, user_id = %auth_user.user_id(), "Checkout session created");
    Ok(Json(session))
}

#[cfg(not(feature = "billing"))]
pub async fn checkout(
    Extension(auth_user): Extension<AuthUser>,
    Json(_req): Json<CheckoutRequest>,
) -> ApiResult<Json<Value>> {
    auth_user.require_staff()?;
    Err(ApiError::ServiceUnavailable(
        BILLING_NOT_CONFIGURED.to_string(),
    ))
}

fn stripe_signature(headers: &HeaderMap) -> ApiResult<&str> {
    headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe-Signature header".to_string()))
}

#[cfg(feature = "billing")]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let billing = state
        .billing_service()
        .ok_or_else(|| ApiError::ServiceUnavailable(BILLING_NOT_CONFIGURED.to_string()))?;

    let signature = stripe_signature(&headers)?;
    let event = billing.webhooks.verify_event(&body, signature)?;

    tracing::info!(event_id = %event.id, event_type = %event.type_, "Stripe webhook received");
    billing.webhooks.handle_event(event).await?;

    Ok(Json(serde_json::json!({ "received": true })))
}

#[cfg(not(feature = "billing"))]
pub async fn webhook(headers: HeaderMap, _body: String) -> ApiResult<Json<Value>> {
    stripe_signature(&headers)?;
    Err(ApiError::ServiceUnavailable(
        BILLING_NOT_CONFIGURED.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_checkout_request_parses_tier() {
        let req: CheckoutRequest = serde_json::from_str(r#"{"tier": "club"}"#).unwrap();
        assert_eq!(req.tier, SubscriptionTier::Club);
        assert!(serde_json::from_str::<CheckoutRequest>(r#"{"tier": "gold"}"#).is_err());
    }

    #[test]
    fn test_signature_header_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            stripe_signature(&headers),
            Err(ApiError::BadRequest(_))
        ));

        headers.insert("Stripe-Signature", HeaderValue::from_static("t=1,v1=abc"));
        assert_eq!(stripe_signature(&headers).unwrap(), "t=1,v1=abc");
    }
}
