//! Domain types shared by the registry, router, scheduler and sessions.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RelayError;

/// Stable client identifier, assigned by the credential store at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(i64);

impl ClientId {
    /// Wrap a raw identifier.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw identifier value.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Per-client secret bound at registration.
///
/// The salt never leaves the server after the registration response, so
/// `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt(String);

impl Salt {
    pub fn new(salt: impl Into<String>) -> Self {
        Self(salt.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Salt(..)")
    }
}

/// What the credential resolver hands back for a valid bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: ClientId,
    pub salt: Salt,
}

impl ClientCredentials {
    pub fn new(client_id: ClientId, salt: Salt) -> Self {
        Self { client_id, salt }
    }
}

/// Identifies one registration attempt.
///
/// A client that reconnects keeps its [`ClientId`] but gets a fresh
/// `ConnectionId`, which lets the registry tell a stale cleanup apart from
/// the live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence id assigned by the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat message as carried on the wire.
///
/// JSON field names follow the deployed client protocol (`clientId`,
/// `chatId`, `timestamp_ms`, `hash`); the descriptive names are accepted as
/// aliases on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender identity. Overwritten by the session with the authenticated id.
    #[serde(rename = "clientId", alias = "senderIdentity", default)]
    pub sender: ClientId,
    #[serde(rename = "chatId", alias = "chatID")]
    pub chat_id: String,
    pub text: String,
    #[serde(rename = "timestamp_ms", alias = "timestampMillis", default)]
    pub timestamp_ms: i64,
    /// Integrity proof, see [`crate::integrity`].
    #[serde(rename = "hash", alias = "integrityProof")]
    pub proof: String,
}

impl ChatMessage {
    pub fn new(
        sender: ClientId,
        chat_id: impl Into<String>,
        text: impl Into<String>,
        timestamp_ms: i64,
        proof: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            chat_id: chat_id.into(),
            text: text.into(),
            timestamp_ms,
            proof: proof.into(),
        }
    }

    /// Decode an inbound frame payload.
    pub fn decode(payload: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Serialize for fan-out.
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A message as owned by the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub message: ChatMessage,
    /// Only ever moves from `false` to `true`.
    pub delivered: bool,
}

/// Frames read from a client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Frames queued for a client transport's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A text frame. Shared so a fan-out serializes each message once.
    Text(Arc<str>),
    /// Close the transport with the given reason.
    Close { reason: String },
}

impl OutboundFrame {
    pub fn text(payload: impl Into<Arc<str>>) -> Self {
        Self::Text(payload.into())
    }

    /// The text payload, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Close { .. } => None,
        }
    }
}

/// Answer to a presence query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

impl Presence {
    pub fn is_online(self) -> bool {
        matches!(self, Presence::Online)
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Online => write!(f, "online"),
            Presence::Offline => write!(f, "offline"),
        }
    }
}
