//! Per-message integrity proofs.
//!
//! A proof is the lowercase hex SHA-256 digest of the message text followed
//! by the sender's salt. Holding the salt issued at registration is what the
//! proof demonstrates; the bearer token is not re-checked per message.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::RelayError;
use crate::types::{ChatMessage, Salt};

/// Compute the proof for `text` under `salt`.
pub fn proof(text: &str, salt: &Salt) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(salt.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a message's proof against the sender's salt.
///
/// Comparison is exact: an upper-case hex proof is not accepted.
pub fn verify(message: &ChatMessage, salt: &Salt) -> Result<(), RelayError> {
    if message.proof == proof(&message.text, salt) {
        Ok(())
    } else {
        warn!(client_id = %message.sender, chat_id = %message.chat_id, "Invalid integrity proof");
        Err(RelayError::Integrity(message.sender))
    }
}
