//! Signed bearer tokens.
//!
//! A token is `base64url(claims).base64url(hmac)` where the claims are a
//! small JSON object and the MAC is HMAC-SHA256 over the encoded claims.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::CredentialError;

type HmacSha256 = Hmac<Sha256>;

/// Length of generated signing keys.
const GENERATED_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Username the token was issued to
    pub sub: String,
    /// Expiry, unix seconds
    pub exp: i64,
}

pub struct TokenIssuer {
    key: Vec<u8>,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(key: &[u8], ttl: Duration) -> Self {
        Self {
            key: key.to_vec(),
            ttl,
        }
    }

    /// An issuer with a random key; its tokens die with the process.
    pub fn random(ttl: Duration) -> Self {
        let mut key = vec![0u8; GENERATED_KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self { key, ttl }
    }

    fn mac(&self) -> Result<HmacSha256, CredentialError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| CredentialError::Signing(e.to_string()))
    }

    /// Issue a token for `username` expiring `ttl` from now.
    pub fn issue(&self, username: &str) -> Result<String, CredentialError> {
        let claims = TokenClaims {
            sub: username.to_string(),
            exp: Utc::now().timestamp() + self.ttl.as_secs() as i64,
        };
        let json = serde_json::to_vec(&claims).map_err(|e| CredentialError::Signing(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", payload, signature))
    }

    /// Check the signature and expiry of `token`.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, CredentialError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<TokenClaims, CredentialError> {
        let (payload, signature) = token.split_once('.').ok_or(CredentialError::InvalidToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CredentialError::InvalidToken)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| CredentialError::InvalidToken)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CredentialError::InvalidToken)?;
        let claims: TokenClaims =
            serde_json::from_slice(&json).map_err(|_| CredentialError::InvalidToken)?;

        if claims.exp <= now {
            return Err(CredentialError::TokenExpired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"test-key", Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = issuer();
        let token = issuer.issue("alice1").unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice1");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn test_rejects_other_key() {
        let token = issuer().issue("alice1").unwrap();
        let other = TokenIssuer::new(b"other-key", Duration::from_secs(3600));

        assert!(matches!(other.verify(&token), Err(CredentialError::InvalidToken)));
    }

    #[test]
    fn test_rejects_tampered_claims() {
        let issuer = issuer();
        let token = issuer.issue("alice1").unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = URL_SAFE_NO_PAD.encode(br#"{"sub":"mallory","exp":99999999999}"#);

        let forged = format!("{}.{}", forged_claims, signature);
        assert!(matches!(issuer.verify(&forged), Err(CredentialError::InvalidToken)));
    }

    #[test]
    fn test_rejects_garbage() {
        let issuer = issuer();
        for token in ["", "abc", "abc.def", ".", "a.b.c"] {
            assert!(issuer.verify(token).is_err(), "accepted {token:?}");
        }
    }

    #[test]
    fn test_expiry() {
        let issuer = issuer();
        let token = issuer.issue("alice1").unwrap();
        let claims = issuer.verify(&token).unwrap();

        assert!(issuer.verify_at(&token, claims.exp - 1).is_ok());
        assert!(matches!(
            issuer.verify_at(&token, claims.exp),
            Err(CredentialError::TokenExpired)
        ));
    }

    #[test]
    fn test_random_issuers_differ() {
        let a = TokenIssuer::random(Duration::from_secs(60));
        let b = TokenIssuer::random(Duration::from_secs(60));
        let token = a.issue("alice1").unwrap();

        assert!(a.verify(&token).is_ok());
        assert!(b.verify(&token).is_err());
    }
}
