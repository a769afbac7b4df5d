//! Durable message store interface.
//!
//! The relay only needs three operations from the store. Consistency of the
//! `delivered` flag (it never reverts) is the store's responsibility.

mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{ChatMessage, MessageId, StoredMessage};

pub use memory::InMemoryMessageStore;

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a message as undelivered.
    async fn append(&self, message: &ChatMessage) -> Result<StoredMessage, StoreError>;

    /// All messages whose `delivered` flag is still false, oldest first.
    async fn fetch_undelivered(&self) -> Result<Vec<StoredMessage>, StoreError>;

    /// Flip a message's `delivered` flag to true. Calling it again is a no-op.
    async fn mark_delivered(&self, id: MessageId) -> Result<(), StoreError>;
}
