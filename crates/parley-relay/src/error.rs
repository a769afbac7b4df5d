//! Error types for the relay core.

use thiserror::Error;

use crate::types::{ClientId, MessageId};

/// Bearer token resolution failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header, or an empty bearer token
    #[error("Authorization header is missing")]
    MissingToken,

    /// The token is malformed, expired, or unknown
    #[error("Invalid token")]
    InvalidToken,

    /// The credential backend could not be queried
    #[error("Credential lookup failed: {0}")]
    Lookup(String),
}

/// Durable store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is unreachable or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A query or statement failed
    #[error("Store query failed: {0}")]
    Query(String),

    /// `mark_delivered` was called for an id the store does not know
    #[error("Message not found: {0}")]
    NotFound(MessageId),
}

impl StoreError {
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Transport failures on a single connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The writer for this connection has gone away
    #[error("Connection closed")]
    Closed,

    /// The outbound queue is full; the peer is not keeping up
    #[error("Outbound queue full")]
    Backpressure,

    /// The underlying socket reported an error
    #[error("Transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Bearer token missing or rejected
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A connection for this identity is already registered
    #[error("Client {0} is already connected")]
    DuplicateIdentity(ClientId),

    /// Integrity proof did not match the sender's salt
    #[error("Integrity proof mismatch for message from client {0}")]
    Integrity(ClientId),

    /// Inbound frame could not be decoded
    #[error("Malformed frame: {0}")]
    Decode(String),

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Durable store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The publish worker has stopped
    #[error("Relay is shutting down")]
    Shutdown,
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
