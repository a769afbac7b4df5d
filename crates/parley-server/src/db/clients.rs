//! Registered clients and bearer token resolution.

use std::sync::Arc;

use async_trait::async_trait;
use parley_relay::{AuthError, ClientCredentials, ClientId, CredentialResolver, Salt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::Database;
use crate::auth::{new_salt, validate_username, CredentialError, TokenIssuer};

/// A registered client, as returned to it by `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
    pub id: ClientId,
    pub username: String,
    pub token: String,
    pub salt: String,
}

/// Client registration and lookup.
pub struct ClientRepository {
    db: Arc<Database>,
    tokens: Arc<TokenIssuer>,
}

impl ClientRepository {
    pub fn new(db: Arc<Database>, tokens: Arc<TokenIssuer>) -> Self {
        Self { db, tokens }
    }

    /// Register `username` with a fresh token and salt.
    #[instrument(skip(self))]
    pub async fn register(&self, username: &str) -> Result<Client, CredentialError> {
        validate_username(username)?;

        if self.find_by_username(username).await?.is_some() {
            return Err(CredentialError::UsernameTaken(username.to_string()));
        }

        let token = self.tokens.issue(username)?;
        let salt = new_salt();

        let conn = self.db.connection().await.map_err(db_error)?;
        conn.execute(
            "INSERT INTO clients (username, token, salt) VALUES (?, ?, ?)",
            libsql::params![username, token.clone(), salt.clone()],
        )
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed: clients.username") {
                CredentialError::UsernameTaken(username.to_string())
            } else {
                CredentialError::DatabaseError(format!("Failed to insert client: {}", e))
            }
        })?;
        let id = ClientId::new(conn.last_insert_rowid());

        info!(client_id = %id, username = %username, "Registered client");
        Ok(Client {
            id,
            username: username.to_string(),
            token,
            salt,
        })
    }

    #[instrument(skip(self))]
    pub async fn find_by_username(&self, username: &str) -> Result<Option<Client>, CredentialError> {
        self.find_one(
            "SELECT id, username, token, salt FROM clients WHERE username = ?",
            username,
        )
        .await
    }

    #[instrument(skip_all)]
    pub async fn find_by_token(&self, token: &str) -> Result<Option<Client>, CredentialError> {
        self.find_one(
            "SELECT id, username, token, salt FROM clients WHERE token = ?",
            token,
        )
        .await
    }

    async fn find_one(&self, query: &str, key: &str) -> Result<Option<Client>, CredentialError> {
        let conn = self.db.connection().await.map_err(db_error)?;
        let mut rows = conn
            .query(query, libsql::params![key])
            .await
            .map_err(|e| CredentialError::DatabaseError(format!("Failed to query client: {}", e)))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| CredentialError::DatabaseError(format!("Failed to read client row: {}", e)))?
        else {
            return Ok(None);
        };

        let read = |e: libsql::Error| CredentialError::DatabaseError(format!("Bad client row: {}", e));
        Ok(Some(Client {
            id: ClientId::new(row.get::<i64>(0).map_err(read)?),
            username: row.get::<String>(1).map_err(read)?,
            token: row.get::<String>(2).map_err(read)?,
            salt: row.get::<String>(3).map_err(read)?,
        }))
    }
}

fn db_error(e: impl std::fmt::Display) -> CredentialError {
    CredentialError::DatabaseError(e.to_string())
}

#[async_trait]
impl CredentialResolver for ClientRepository {
    async fn resolve(&self, bearer_token: &str) -> Result<ClientCredentials, AuthError> {
        let claims = self.tokens.verify(bearer_token).map_err(|e| {
            debug!(error = %e, "Rejected bearer token");
            AuthError::InvalidToken
        })?;

        match self.find_by_token(bearer_token).await {
            Ok(Some(client)) if client.username == claims.sub => {
                Ok(ClientCredentials::new(client.id, Salt::new(client.salt)))
            }
            Ok(_) => {
                warn!(username = %claims.sub, "Signed token has no matching client");
                Err(AuthError::InvalidToken)
            }
            Err(e) => Err(AuthError::Lookup(e.to_string())),
        }
    }
}
