//! Argon2 password hashing for stored profiles.

use crate::errors::ServiceError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::{debug, error, instrument};

/// Hashes a plain-text password into a PHC string.
#[instrument(name = "auth::hash_password", skip(password), err(Display))]
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    if password.is_empty() {
        return Err(ServiceError::ValidationError(
            "Password cannot be empty".to_string(),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "Argon2 password hashing failed");
            ServiceError::InternalError(format!("password hashing failed: {}", e))
        })
}

/// Checks a candidate password against a stored hash.
///
/// A mismatch is `Ok(false)`; only a corrupt stored hash is an error.
#[instrument(name = "auth::verify_password", skip_all, err(Display))]
pub fn verify_password(stored_hash: &str, candidate: &str) -> Result<bool, ServiceError> {
    if candidate.is_empty() {
        return Ok(false);
    }

    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!(error = %e, "stored password hash is malformed");
        ServiceError::InternalError(format!("invalid stored password hash: {}", e))
    })?;

    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => {
            debug!("password mismatch");
            Ok(false)
        }
        Err(e) => Err(ServiceError::InternalError(format!(
            "password verification failed: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("green-tomatoes").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "green-tomatoes").unwrap());
        assert!(!verify_password(&hash, "red-tomatoes").unwrap());
        assert!(!verify_password(&hash, "").unwrap());
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(matches!(
            hash_password(""),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn corrupt_hash_is_an_error() {
        assert!(verify_password("not-a-phc-string", "pw").is_err());
    }
}
