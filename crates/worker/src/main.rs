#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! My Coach Developer Background Worker
//!
//! Scheduled jobs:
//! - Expired session and password reset cleanup (hourly)
//! - Stripe webhook event retention (daily at 3:30 AM UTC)

mod cleanup;

use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting My Coach Developer Worker");

    let pool = create_db_pool().await?;
    let scheduler = JobScheduler::new().await?;

    // Job 1: expired credentials, at minute 5 of every hour
    let credentials_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 5 * * * *", move |_uuid, _l| {
            let pool = credentials_pool.clone();
            Box::pin(async move {
                match cleanup::purge_expired_credentials(&pool, OffsetDateTime::now_utc()).await {
                    Ok(swept) if swept.total() > 0 => info!(
                        sessions = swept.sessions,
                        password_resets = swept.password_resets,
                        "Purged expired credentials"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = ?e, "Expired credential cleanup failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Expired credential cleanup (hourly)");

    // Job 2: webhook event retention
    let webhook_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 30 3 * * *", move |_uuid, _l| {
            let pool = webhook_pool.clone();
            Box::pin(async move {
                match cleanup::purge_old_webhook_events(&pool, OffsetDateTime::now_utc()).await {
                    Ok(deleted) => info!(
                        deleted = deleted,
                        retention_days = cleanup::WEBHOOK_EVENT_RETENTION_DAYS,
                        "Webhook event retention sweep complete"
                    ),
                    Err(e) => error!(error = ?e, "Webhook event retention sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Webhook event retention (daily 3:30 UTC)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker");
    Ok(())
}
