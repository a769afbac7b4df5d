//! Durable message store backed by libSQL.

use std::sync::Arc;

use async_trait::async_trait;
use parley_relay::{ChatMessage, ClientId, MessageId, MessageStore, StoreError, StoredMessage};
use tracing::{debug, instrument};

use super::Database;

/// [`MessageStore`] over the `chats` and `messages` tables.
pub struct SqlMessageStore {
    db: Arc<Database>,
}

impl SqlMessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn row_to_stored(row: &libsql::Row) -> Result<StoredMessage, StoreError> {
    let read = |e: libsql::Error| StoreError::query(format!("Bad message row: {}", e));
    Ok(StoredMessage {
        id: MessageId::new(row.get::<i64>(0).map_err(read)?),
        message: ChatMessage {
            chat_id: row.get::<String>(1).map_err(read)?,
            sender: ClientId::new(row.get::<i64>(2).map_err(read)?),
            text: row.get::<String>(3).map_err(read)?,
            timestamp_ms: row.get::<i64>(4).map_err(read)?,
            proof: row.get::<String>(5).map_err(read)?,
        },
        delivered: row.get::<i64>(6).map_err(read)? != 0,
    })
}

#[async_trait]
impl MessageStore for SqlMessageStore {
    #[instrument(skip_all, fields(client_id = %message.sender, chat_id = %message.chat_id))]
    async fn append(&self, message: &ChatMessage) -> Result<StoredMessage, StoreError> {
        let conn = self
            .db
            .connection()
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;

        conn.execute(
            "INSERT INTO chats (client_id, chat_id) VALUES (?, ?) ON CONFLICT(chat_id) DO NOTHING",
            libsql::params![message.sender.get(), message.chat_id.clone()],
        )
        .await
        .map_err(|e| StoreError::query(format!("Failed to create chat: {}", e)))?;

        conn.execute(
            r#"
            INSERT INTO messages (chat_id, client_id, text, timestamp_ms, hash, delivered)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
            libsql::params![
                message.chat_id.clone(),
                message.sender.get(),
                message.text.clone(),
                message.timestamp_ms,
                message.proof.clone()
            ],
        )
        .await
        .map_err(|e| StoreError::query(format!("Failed to insert message: {}", e)))?;

        let id = MessageId::new(conn.last_insert_rowid());
        debug!(message_id = %id, "Stored message");

        Ok(StoredMessage {
            id,
            message: message.clone(),
            delivered: false,
        })
    }

    #[instrument(skip_all)]
    async fn fetch_undelivered(&self) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self
            .db
            .connection()
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;

        let mut rows = conn
            .query(
                r#"
                SELECT id, chat_id, client_id, text, timestamp_ms, hash, delivered
                FROM messages
                WHERE delivered = 0
                ORDER BY id
                "#,
                (),
            )
            .await
            .map_err(|e| StoreError::query(format!("Failed to query undelivered messages: {}", e)))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::query(format!("Failed to read message row: {}", e)))?
        {
            messages.push(row_to_stored(&row)?);
        }
        Ok(messages)
    }

    #[instrument(skip(self))]
    async fn mark_delivered(&self, id: MessageId) -> Result<(), StoreError> {
        let conn = self
            .db
            .connection()
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;

        let updated = conn
            .execute(
                "UPDATE messages SET delivered = 1 WHERE id = ? AND delivered = 0",
                libsql::params![id.get()],
            )
            .await
            .map_err(|e| StoreError::query(format!("Failed to update message status: {}", e)))?;
        if updated > 0 {
            return Ok(());
        }

        // Nothing changed: either already delivered or unknown
        let mut rows = conn
            .query("SELECT 1 FROM messages WHERE id = ?", libsql::params![id.get()])
            .await
            .map_err(|e| StoreError::query(format!("Failed to query message: {}", e)))?;
        match rows
            .next()
            .await
            .map_err(|e| StoreError::query(format!("Failed to read message row: {}", e)))?
        {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MigrationRunner;

    async fn store() -> SqlMessageStore {
        let db = Database::in_memory("test").await.unwrap();
        MigrationRunner::parley().run(&db).await.unwrap();
        SqlMessageStore::new(Arc::new(db))
    }

    fn message(sender: i64, chat: &str, text: &str) -> ChatMessage {
        ChatMessage::new(ClientId::new(sender), chat, text, 1_700_000_000_000, "proof")
    }

    #[tokio::test]
    async fn test_append_and_fetch_undelivered() {
        let store = store().await;

        let first = store.append(&message(1, "lobby", "hi")).await.unwrap();
        let second = store.append(&message(2, "lobby", "hello")).await.unwrap();
        assert!(first.id < second.id);
        assert!(!first.delivered);

        let undelivered = store.fetch_undelivered().await.unwrap();
        assert_eq!(undelivered, vec![first, second]);
    }

    #[tokio::test]
    async fn test_mark_delivered_is_monotonic() {
        let store = store().await;
        let first = store.append(&message(1, "lobby", "hi")).await.unwrap();
        let second = store.append(&message(1, "lobby", "again")).await.unwrap();

        store.mark_delivered(first.id).await.unwrap();
        // Marking twice is fine
        store.mark_delivered(first.id).await.unwrap();

        let undelivered = store.fetch_undelivered().await.unwrap();
        assert_eq!(undelivered.len(), 1);
        assert_eq!(undelivered[0].id, second.id);
    }

    #[tokio::test]
    async fn test_mark_unknown_message() {
        let store = store().await;
        let result = store.mark_delivered(MessageId::new(42)).await;
        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == MessageId::new(42)));
    }

    #[tokio::test]
    async fn test_scheduler_redelivers_from_sql_store() {
        use parley_relay::{BroadcastRouter, ConnectionRegistry, RedeliveryScheduler};
        use std::time::Duration;

        let store = Arc::new(store().await);
        let registry = Arc::new(ConnectionRegistry::new());
        let scheduler = RedeliveryScheduler::new(
            store.clone(),
            BroadcastRouter::new(Arc::clone(&registry)),
            Duration::from_secs(3),
        );
        let stored = store.append(&message(1, "lobby", "later")).await.unwrap();

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.pending, 1);

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        registry.register(Arc::new(parley_relay::Connection::new(ClientId::new(2), tx)));
        let report = scheduler.tick().await.unwrap();

        assert_eq!(report.delivered, vec![stored.id]);
        assert!(store.fetch_undelivered().await.unwrap().is_empty());
        let frame = rx.recv().await.unwrap();
        assert_eq!(ChatMessage::decode(frame.as_text().unwrap()).unwrap().text, "later");
    }

    #[tokio::test]
    async fn test_chat_row_created_once() {
        let db = Database::in_memory("test").await.unwrap();
        MigrationRunner::parley().run(&db).await.unwrap();
        let db = Arc::new(db);
        let store = SqlMessageStore::new(Arc::clone(&db));

        store.append(&message(1, "lobby", "a")).await.unwrap();
        store.append(&message(2, "lobby", "b")).await.unwrap();
        store.append(&message(2, "side", "c")).await.unwrap();

        let conn = db.connection().await.unwrap();
        let mut rows = conn
            .query("SELECT chat_id, client_id FROM chats ORDER BY id", ())
            .await
            .unwrap();
        let mut chats = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            chats.push((row.get::<String>(0).unwrap(), row.get::<i64>(1).unwrap()));
        }
        assert_eq!(chats, vec![("lobby".to_string(), 1), ("side".to_string(), 2)]);
    }
}
