#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! My Coach Developer shared types
//!
//! Database pool setup, embedded migrations and the domain vocabulary
//! (roles, subscription tiers, identifiers, input validation) used by the
//! API server, the billing crate and the worker.

pub mod db;
pub mod error;
pub mod ids;
pub mod types;
pub mod validation;

pub use db::{create_pool, run_migrations};
pub use error::{SharedError, SharedResult};
pub use ids::{new_id, IdPrefix};
pub use types::{
    PlanLimits, Role, SessionStatus, SubscriptionTier, TemplateRole, DEFAULT_SESSION_PARTS,
    UNLIMITED_LIMITS,
};
pub use validation::{normalize_email, validate_email, validate_password};
