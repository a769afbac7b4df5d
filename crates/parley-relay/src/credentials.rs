//! Bearer token resolution.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::AuthError;
use crate::types::ClientCredentials;

/// Resolves a bearer token to the client it was issued to.
#[async_trait]
pub trait CredentialResolver: Send + Sync + 'static {
    async fn resolve(&self, bearer_token: &str) -> Result<ClientCredentials, AuthError>;
}

/// Extract the token from an `Authorization` header value.
///
/// Accepts `Bearer <token>`, or a bare token. Empty tokens are treated as
/// missing.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.map(str::trim_start).ok_or(AuthError::MissingToken)?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Fixed token table, for tests and local runs.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    tokens: RwLock<HashMap<String, ClientCredentials>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, credentials: ClientCredentials) {
        self.tokens.write().insert(token.into(), credentials);
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, bearer_token: &str) -> Result<ClientCredentials, AuthError> {
        self.tokens
            .read()
            .get(bearer_token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientId, Salt};

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("abc")).unwrap(), "abc");
        assert!(matches!(bearer_token(None), Err(AuthError::MissingToken)));
        assert!(matches!(
            bearer_token(Some("Bearer ")),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(bearer_token(Some("")), Err(AuthError::MissingToken)));
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let creds = StaticCredentials::new();
        let expected = ClientCredentials::new(ClientId::new(4), Salt::new("s"));
        creds.insert("tok", expected.clone());

        assert_eq!(creds.resolve("tok").await.unwrap(), expected);
        assert!(matches!(
            creds.resolve("nope").await,
            Err(AuthError::InvalidToken)
        ));
    }
}
