//! Retention sweeps for expired credentials and processed Stripe events

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

/// Stripe webhook events older than this are deleted
pub const WEBHOOK_EVENT_RETENTION_DAYS: i64 = 90;

/// Rows removed by one hourly sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredCredentials {
    pub sessions: u64,
    pub password_resets: u64,
}

impl ExpiredCredentials {
    pub fn total(&self) -> u64 {
        self.sessions + self.password_resets
    }
}

/// Cutoff before which webhook events are purged
pub fn webhook_event_cutoff(now: OffsetDateTime) -> OffsetDateTime {
    now - Duration::days(WEBHOOK_EVENT_RETENTION_DAYS)
}

/// Delete login sessions and password reset tokens past their expiry
pub async fn purge_expired_credentials(
    pool: &PgPool,
    now: OffsetDateTime,
) -> Result<ExpiredCredentials, sqlx::Error> {
    let sessions = sqlx::query("DELETE FROM user_sessions WHERE expires_at < $1")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();

    let password_resets = sqlx::query("DELETE FROM password_resets WHERE expires_at < $1")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(ExpiredCredentials {
        sessions,
        password_resets,
    })
}

/// Delete webhook idempotency records past the retention window
pub async fn purge_old_webhook_events(
    pool: &PgPool,
    now: OffsetDateTime,
) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM stripe_webhook_events WHERE created_at < $1")
        .bind(webhook_event_cutoff(now))
        .execute(pool)
        .await?
        .rows_affected();
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_webhook_event_cutoff() {
        let now = datetime!(2026-06-30 12:00 UTC);
        assert_eq!(webhook_event_cutoff(now), datetime!(2026-04-01 12:00 UTC));
    }

    #[test]
    fn test_expired_total() {
        let swept = ExpiredCredentials {
            sessions: 4,
            password_resets: 2,
        };
        assert_eq!(swept.total(), 6);
        assert_eq!(ExpiredCredentials::default().total(), 0);
    }
}
