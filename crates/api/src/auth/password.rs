//! Password hashing with Argon2id

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::RngCore;

use crate::error::{ApiError, ApiResult};

pub fn hash_password(password: &str) -> ApiResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| ApiError::Internal(format!("Salt encoding failed: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))
}

/// Returns false for a wrong password or an unparseable stored hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash could not be parsed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("training123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("training123", &hash));
        assert!(!verify_password("training124", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same-password1").unwrap();
        let b = hash_password("same-password1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_hash_does_not_verify() {
        assert!(!verify_password("anything1", "not-a-hash"));
        assert!(!verify_password("anything1", ""));
    }
}
