//! Handle and credential validation.
//!
//! Handles are the immutable, shareable user identifiers: they start with
//! the `@` sigil and meet a minimum length. Credentials are stored as
//! `salt$digest`: a random 16-byte salt and the SHA-256 of salt‖password,
//! both hex encoded.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{RelayError, Result};

/// Reserved sigil every handle starts with.
pub const HANDLE_SIGIL: char = '@';

/// Minimum handle length, sigil included.
pub const MIN_HANDLE_LEN: usize = 4;

/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 8;

const SALT_LEN: usize = 16;

/// Validate a handle's shape. Uniqueness is the store's job.
pub fn validate_handle(handle: &str) -> Result<()> {
    if !handle.starts_with(HANDLE_SIGIL) {
        return Err(RelayError::Validation(format!(
            "handle must start with '{}'",
            HANDLE_SIGIL
        )));
    }
    if handle.chars().count() < MIN_HANDLE_LEN {
        return Err(RelayError::Validation(format!(
            "handle must be at least {} characters",
            MIN_HANDLE_LEN
        )));
    }
    if handle[1..].contains(HANDLE_SIGIL) || handle.contains(char::is_whitespace) {
        return Err(RelayError::Validation(
            "handle must not contain whitespace or extra sigils".to_string(),
        ));
    }
    Ok(())
}

/// Validate a registration password.
pub fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(RelayError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}${}", hex::encode(salt), digest(&salt, password))
}

/// Verify a password against a stored `salt$digest` hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, expected)) = stored.split_once('$') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    digest(&salt, password) == expected
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_handles() {
        assert!(validate_handle("@ali").is_ok());
        assert!(validate_handle("@alice_97").is_ok());
    }

    #[test]
    fn test_handle_requires_sigil() {
        assert!(validate_handle("alice").is_err());
    }

    #[test]
    fn test_handle_minimum_length() {
        assert!(validate_handle("@ab").is_err());
    }

    #[test]
    fn test_handle_rejects_whitespace_and_extra_sigils() {
        assert!(validate_handle("@a b").is_err());
        assert!(validate_handle("@a@b").is_err());
    }

    #[test]
    fn test_password_minimum_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn test_hash_round_trip() {
        let hash = hash_password("correct horse");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-hash"));
        assert!(!verify_password("anything", "zzzz$abcd"));
    }
}
