//! Client credentials
//!
//! Registration hands a client three things: a numeric id, a bearer token
//! for opening the WebSocket, and a salt that proves message integrity.
//!
//! - `secrets`: one-time registration secrets that gate `POST /register`
//! - `tokens`: HMAC-signed bearer tokens with an expiry

pub mod secrets;
pub mod tokens;

use thiserror::Error;
use uuid::Uuid;

pub use secrets::RegistrationSecrets;
pub use tokens::TokenIssuer;

/// Minimum username length accepted at registration.
pub const MIN_USERNAME_LEN: usize = 6;

/// Credential-related errors
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Invalid secret")]
    InvalidSecret,

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Failed to read secrets file: {0}")]
    SecretsFile(String),

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Usernames are at least six ASCII letters or digits.
pub fn validate_username(username: &str) -> Result<(), CredentialError> {
    if username.len() < MIN_USERNAME_LEN {
        return Err(CredentialError::InvalidUsername(format!(
            "must be at least {} characters",
            MIN_USERNAME_LEN
        )));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CredentialError::InvalidUsername(
            "must contain only letters and digits".to_string(),
        ));
    }
    Ok(())
}

/// A fresh per-client salt.
pub fn new_salt() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice1").is_ok());
        assert!(validate_username("ALICE123456").is_ok());

        assert!(validate_username("alice").is_err());
        assert!(validate_username("").is_err());
        assert!(validate_username("alice_1").is_err());
        assert!(validate_username("alice bob").is_err());
        assert!(validate_username("älice12").is_err());
    }

    #[test]
    fn test_new_salt_is_unique_uuid() {
        let a = new_salt();
        let b = new_salt();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
