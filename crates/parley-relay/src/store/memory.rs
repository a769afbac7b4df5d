//! In-process message store.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::MessageStore;
use crate::error::StoreError;
use crate::types::{ChatMessage, MessageId, StoredMessage};

/// Message store backed by a vector, for tests and single-process demos.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored message, delivered or not.
    pub fn all(&self) -> Vec<StoredMessage> {
        self.messages.lock().clone()
    }

    pub fn get(&self, id: MessageId) -> Option<StoredMessage> {
        self.messages.lock().iter().find(|m| m.id == id).cloned()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: &ChatMessage) -> Result<StoredMessage, StoreError> {
        let mut messages = self.messages.lock();
        let id = MessageId::new(messages.len() as i64 + 1);
        let stored = StoredMessage {
            id,
            message: message.clone(),
            delivered: false,
        };
        messages.push(stored.clone());
        debug!(message_id = %id, "Stored message");
        Ok(stored)
    }

    async fn fetch_undelivered(&self) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|m| !m.delivered)
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, id: MessageId) -> Result<(), StoreError> {
        let mut messages = self.messages.lock();
        let stored = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound(id))?;
        stored.delivered = true;
        Ok(())
    }
}
