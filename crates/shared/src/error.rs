//! Shared error type

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown subscription tier: {0}")]
    UnknownTier(String),

    #[error("Unknown session status: {0}")]
    UnknownStatus(String),

    #[error("{0}")]
    Validation(String),
}

pub type SharedResult<T> = Result<T, SharedError>;
