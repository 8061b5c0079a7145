//! Stripe webhook handling
//!
//! Verifies the `Stripe-Signature` header, records each event id once, and
//! moves organizations between plans on checkout and subscription events.

use std::str::FromStr;

use hmac::{Hmac, Mac};
use mcd_shared::SubscriptionTier;
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{CheckoutSession, Event, EventObject, EventType, Subscription, Webhook};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::SubscriptionService;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Minutes after which an event stuck in `processing` may be claimed again
pub const PROCESSING_TIMEOUT_MINUTES: i64 = 30;

/// Whether a redelivered event may be processed again
///
/// Failed attempts are always retried. An attempt still marked `processing`
/// is only taken over once it is older than the timeout. Successful events
/// are never run twice.
pub fn is_reclaimable(
    processing_result: &str,
    processing_started_at: OffsetDateTime,
    now: OffsetDateTime,
) -> bool {
    match processing_result {
        "error" => true,
        "processing" => {
            now - processing_started_at > time::Duration::minutes(PROCESSING_TIMEOUT_MINUTES)
        }
        _ => false,
    }
}

/// Check a `t=...,v1=...` signature header against `payload`
///
/// Any of several `v1` entries may match (Stripe sends one per active secret
/// during rotation).
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    if signatures.is_empty() {
        return Err(BillingError::WebhookSignatureInvalid);
    }

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    let matched = signatures
        .iter()
        .any(|sig| bool::from(computed.as_bytes().ct_eq(sig.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(BillingError::WebhookSignatureInvalid)
    }
}

pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Falls back to manual verification when the library rejects an event
    /// shape from a newer API version.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, webhook_secret, now)?;

        serde_json::from_str::<Event>(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })
    }

    /// Handle a verified event exactly once
    ///
    /// A new event id is claimed by insert. A known id is claimed again only
    /// when its earlier attempt failed or has been stuck in `processing`
    /// past the timeout; anything else is a duplicate delivery.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type = event.type_.to_string();
        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let claimed = self
            .claim_event(&event_id, &event_type, event_timestamp)
            .await?;

        if !claimed {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                "Duplicate webhook event, skipping"
            );
            return Ok(());
        }

        tracing::info!(event_id = %event_id, event_type = %event_type, "Processing Stripe webhook event");

        let result = self.process_event(event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(event_id = %event_id, error = %e, "Failed to record webhook result");
        }

        result
    }

    async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        event_timestamp: OffsetDateTime,
    ) -> BillingResult<bool> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(event_timestamp)
        .fetch_optional(&self.pool)
        .await?;
        if inserted.is_some() {
            return Ok(true);
        }

        let existing: Option<(String, OffsetDateTime)> = sqlx::query_as(
            "SELECT processing_result, processing_started_at FROM stripe_webhook_events \
             WHERE stripe_event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((result, started_at)) = existing else {
            return Ok(false);
        };
        if !is_reclaimable(&result, started_at, OffsetDateTime::now_utc()) {
            return Ok(false);
        }

        // Compare-and-set so two concurrent redeliveries cannot both win
        let reclaimed = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = 'processing', processing_started_at = NOW(), error_message = NULL
            WHERE stripe_event_id = $1
              AND processing_result = $2
              AND processing_started_at = $3
            "#,
        )
        .bind(event_id)
        .bind(&result)
        .bind(started_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if reclaimed > 0 {
            tracing::info!(event_id = %event_id, previous_result = %result, "Reclaimed webhook event for retry");
        }
        Ok(reclaimed > 0)
    }

    async fn process_event(&self, event: Event) -> BillingResult<()> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                let session = extract_checkout_session(event)?;
                self.handle_checkout_completed(session).await
            }
            EventType::CustomerSubscriptionUpdated => {
                let subscription = extract_subscription(event)?;
                SubscriptionService::new(self.stripe.clone(), self.pool.clone())
                    .sync_subscription_to_db(&subscription)
                    .await
            }
            EventType::CustomerSubscriptionDeleted => {
                let subscription = extract_subscription(event)?;
                SubscriptionService::new(self.stripe.clone(), self.pool.clone())
                    .revert_to_individual(subscription.id.as_str())
                    .await
            }
            other => {
                tracing::info!(event_type = %other, "Received unhandled Stripe event type");
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, session: CheckoutSession) -> BillingResult<()> {
        let metadata = session.metadata.clone().unwrap_or_default();

        let org_id = metadata
            .get("org_id")
            .cloned()
            .or_else(|| session.client_reference_id.clone())
            .ok_or_else(|| BillingError::Internal("org_id not found in metadata".to_string()))?;

        let tier = metadata
            .get("tier")
            .map(|t| SubscriptionTier::from_str(t))
            .transpose()
            .map_err(|e| BillingError::InvalidTier(e.to_string()))?
            .ok_or_else(|| BillingError::Internal("tier not found in metadata".to_string()))?;

        let subscription_id = session.subscription.as_ref().map(|s| s.id().to_string());
        let customer_id = session.customer.as_ref().map(|c| c.id().to_string());

        SubscriptionService::new(self.stripe.clone(), self.pool.clone())
            .activate_tier(
                &org_id,
                tier,
                subscription_id.as_deref(),
                customer_id.as_deref(),
            )
            .await?;

        tracing::info!(
            org_id = %org_id,
            tier = %tier,
            session_id = %session.id,
            "Checkout completed"
        );

        Ok(())
    }
}

fn extract_checkout_session(event: Event) -> BillingResult<CheckoutSession> {
    match event.data.object {
        EventObject::CheckoutSession(session) => Ok(session),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected CheckoutSession".to_string(),
        )),
    }
}

fn extract_subscription(event: Event) -> BillingResult<Subscription> {
    match event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Subscription".to_string(),
        )),
    }
}
