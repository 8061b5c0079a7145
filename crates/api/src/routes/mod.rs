//! HTTP routes
//!
//! Everything lives under `/api`. Public routes (sign-in flows, invite
//! validation, health, uploaded files, Stripe webhooks) are merged with the
//! protected router, which requires a session on every request.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::services::ServeDir;

use crate::{auth::require_auth, state::AppState};

pub mod admin;
pub mod auth;
pub mod billing;
pub mod coach_portal;
pub mod coaches;
pub mod health;
pub mod invites;
pub mod observations;
pub mod organization;
pub mod reflection_templates;
#[cfg(test)]
mod router_tests;
pub mod scheduling;
pub mod session_parts;
pub mod summaries;
pub mod uploads;
pub mod users;

pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/", get(health::root))
        .route("/api/health", get(health::health))
        .route("/api/config-check", get(health::config_check))
        .route(
            "/api/status",
            get(health::list_status_checks).post(health::create_status_check),
        )
        // Sign-in flows
        .route("/api/auth/session", post(auth::google_session))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route(
            "/api/auth/verify-reset-token/{token}",
            get(auth::verify_reset_token),
        )
        .route("/api/auth/register-invite", post(auth::register_invite))
        .route("/api/users/check-first", get(users::check_first))
        .route(
            "/api/invites/validate/{invite_id}",
            get(invites::validate_invite),
        )
        .route("/api/billing/webhook", post(billing::webhook))
        .nest_service("/api/uploads", ServeDir::new(&state.config.upload_dir));

    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/change-password", post(auth::change_password))
        // Users
        .route("/api/users", get(users::list_users))
        .route("/api/users/link-by-email", post(users::link_by_email))
        .route("/api/users/{user_id}/role", put(users::update_role))
        .route("/api/users/{user_id}/link-coach", put(users::link_coach))
        .route("/api/users/{user_id}", delete(users::delete_user))
        // Invites
        .route(
            "/api/invites",
            post(invites::create_invite).get(invites::list_invites),
        )
        .route(
            "/api/invites/by-email/{email}",
            delete(invites::delete_invites_by_email),
        )
        .route("/api/invites/{invite_id}", delete(invites::delete_invite))
        .route(
            "/api/invites/{invite_id}/resend",
            post(invites::resend_invite),
        )
        // Organization
        .route(
            "/api/organization",
            get(organization::get_organization).put(organization::update_organization),
        )
        .route(
            "/api/organization/subscription",
            get(organization::get_subscription),
        )
        // Coaches
        .route(
            "/api/coaches",
            get(coaches::list_coaches).post(coaches::create_coach),
        )
        .route(
            "/api/coaches/{coach_id}",
            get(coaches::get_coach)
                .put(coaches::update_coach)
                .delete(coaches::delete_coach),
        )
        .route(
            "/api/coaches/{coach_id}/sessions",
            get(coaches::coach_sessions),
        )
        // Observation sessions
        .route(
            "/api/observations",
            get(observations::list_sessions).post(observations::upsert_session),
        )
        .route(
            "/api/observations/{session_id}",
            get(observations::get_session)
                .put(observations::update_session)
                .delete(observations::delete_session),
        )
        // Coach portal
        .route("/api/coach/dashboard", get(coach_portal::dashboard))
        .route("/api/coach/sessions", get(coach_portal::sessions))
        .route(
            "/api/coach/reflections",
            get(coach_portal::list_reflections).post(coach_portal::save_reflection),
        )
        .route("/api/coach/profile", put(coach_portal::update_profile))
        .route("/api/coach/analytics", get(coach_portal::analytics))
        // Scheduling
        .route(
            "/api/scheduled-observations",
            get(scheduling::list_scheduled).post(scheduling::create_scheduled),
        )
        .route(
            "/api/scheduled-observations/{schedule_id}",
            delete(scheduling::delete_scheduled),
        )
        .route(
            "/api/scheduled-observations/{schedule_id}/status",
            put(scheduling::update_status),
        )
        // Reflection templates
        .route(
            "/api/reflection-templates",
            get(reflection_templates::list_templates).post(reflection_templates::create_template),
        )
        .route(
            "/api/reflection-templates/{template_id}",
            get(reflection_templates::get_template)
                .put(reflection_templates::update_template)
                .delete(reflection_templates::delete_template),
        )
        .route(
            "/api/reflection-templates/{template_id}/set-default",
            post(reflection_templates::set_default),
        )
        .route(
            "/api/reflection-templates/{template_id}/unset-default",
            post(reflection_templates::unset_default),
        )
        // Session parts
        .route(
            "/api/session-parts",
            get(session_parts::list_parts).post(session_parts::create_part),
        )
        .route(
            "/api/session-parts/{part_id}",
            delete(session_parts::delete_part),
        )
        // Uploads
        .route(
            "/api/upload",
            post(uploads::upload_file)
                .layer(DefaultBodyLimit::max(state.config.max_upload_bytes + 64 * 1024)),
        )
        .route("/api/upload/{file_id}", delete(uploads::delete_file))
        // AI summaries
        .route("/api/generate-summary", post(summaries::generate_summary))
        .route(
            "/api/generate-coach-trends",
            post(summaries::generate_coach_trends),
        )
        // Admin
        .route("/api/admin/check", get(admin::check))
        .route(
            "/api/admin/organizations",
            get(admin::list_organizations).post(admin::create_organization),
        )
        .route(
            "/api/admin/organizations/{org_id}/users",
            get(admin::organization_users).post(admin::create_organization_user),
        )
        .route(
            "/api/admin/organizations/{org_id}/coach-developers",
            post(admin::add_coach_developer),
        )
        .route(
            "/api/admin/users/{user_id}/reset-password",
            post(admin::reset_user_password),
        )
        .route("/api/admin/impersonate/{user_id}", post(admin::impersonate))
        .route(
            "/api/admin/stop-impersonation",
            post(admin::stop_impersonation),
        )
        // Billing
        .route("/api/billing/status", get(billing::status))
        .route("/api/billing/checkout", post(billing::checkout))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}

/// `{"status": ...}` acknowledgement body
pub(crate) fn status_body(status: &str) -> serde_json::Value {
    serde_json::json!({ "status": status })
}
