//! Input validation for emails and passwords

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{SharedError, SharedResult};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[allow(clippy::expect_used)] // Constant pattern, checked by tests
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

/// Returns true when `email` looks like a deliverable address
pub fn validate_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Trim and lowercase an email for storage and lookups
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Enforce the password policy: length, at least one letter and one digit
pub fn validate_password(password: &str) -> SharedResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(SharedError::Validation(
            "Password must be at least 8 characters long".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(SharedError::Validation(
            "Password must contain at least one letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(SharedError::Validation(
            "Password must contain at least one number".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(validate_email("coach@example.com"));
        assert!(validate_email("first.last+tag@club-name.co.uk"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!validate_email("no-at-sign.com"));
        assert!(!validate_email("user@domain"));
        assert!(!validate_email("user@domain.c"));
        assert!(!validate_email("user name@example.com"));
        assert!(!validate_email(""));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Coach@Example.COM "), "coach@example.com");
    }

    #[test]
    fn test_password_too_short() {
        let err = validate_password("abc123").unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 8 characters long");
    }

    #[test]
    fn test_password_exactly_min_length() {
        assert!(validate_password("abcdefg1").is_ok());
    }

    #[test]
    fn test_password_needs_letter() {
        let err = validate_password("12345678").unwrap_err();
        assert_eq!(err.to_string(), "Password must contain at least one letter");
    }

    #[test]
    fn test_password_needs_number() {
        let err = validate_password("abcdefgh").unwrap_err();
        assert_eq!(err.to_string(), "Password must contain at least one number");
    }
}
