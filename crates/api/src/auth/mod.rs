//! Authentication module

#[cfg(test)]
mod edge_case_tests;
pub mod google;
pub mod middleware;
#[cfg(test)]
mod middleware_tests;
pub mod password;
pub mod sessions;

pub use google::{GoogleSessionClient, GoogleSessionData};
pub use middleware::{
    authenticate_session, extract_session_token, require_auth, AuthError, AuthState, AuthUser,
};
pub use password::{hash_password, verify_password};
pub use sessions::{
    clear_session_cookie, cookie_headers, create_session, generate_token, hash_token,
    revoke_all_sessions, session_cookie, store_session, SESSION_COOKIE,
};
