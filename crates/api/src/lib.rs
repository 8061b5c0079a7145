// API crate clippy configuration
#![allow(clippy::needless_borrows_for_generic_args)] // Sometimes needed for clarity
#![allow(clippy::format_in_format_args)] // Intentional in logging macros
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! My Coach Developer API Library
//!
//! HTTP API for coaching observations: accounts and sessions, coach profiles,
//! observation records, reflections, scheduling, uploads, AI summaries and
//! club billing.

pub mod access;
pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod linking;
pub mod llm;
pub mod models;
pub mod plans;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
