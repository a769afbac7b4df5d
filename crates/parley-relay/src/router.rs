//! Broadcast fan-out to every online connection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::RelayError;
use crate::registry::ConnectionRegistry;
use crate::types::{ChatMessage, ClientId, OutboundFrame};

/// Per-recipient result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections whose write succeeded
    pub delivered: Vec<ClientId>,
    /// Connections whose write failed and were marked offline
    pub failed: Vec<ClientId>,
}

impl FanOut {
    /// Whether any client other than `sender` got the message.
    pub fn delivered_to_others(&self, sender: ClientId) -> bool {
        self.delivered.iter().any(|id| *id != sender)
    }
}

/// Fans messages out to the registry's online connections.
///
/// Writes go onto each connection's outbound queue without blocking. A
/// failed write marks that connection offline and the fan-out carries on.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize `message` once and push it to every online connection.
    pub fn publish(&self, message: &ChatMessage) -> Result<FanOut, RelayError> {
        let payload = message.encode()?;
        let fan_out = self.deliver(Arc::from(payload));
        debug!(
            client_id = %message.sender,
            chat_id = %message.chat_id,
            delivered = fan_out.delivered.len(),
            failed = fan_out.failed.len(),
            "Broadcast message"
        );
        Ok(fan_out)
    }

    /// Push an already-serialized payload to a fresh online snapshot.
    ///
    /// Each connection in the snapshot gets exactly one write attempt.
    pub fn deliver(&self, payload: Arc<str>) -> FanOut {
        self.fan_out(payload, None)
    }

    /// Like [`deliver`](Self::deliver), but skips `sender`'s own connection.
    pub fn deliver_to_others(&self, payload: Arc<str>, sender: ClientId) -> FanOut {
        self.fan_out(payload, Some(sender))
    }

    fn fan_out(&self, payload: Arc<str>, skip: Option<ClientId>) -> FanOut {
        let mut fan_out = FanOut::default();
        for connection in self.registry.snapshot_online() {
            if skip == Some(connection.client_id()) {
                continue;
            }
            match connection.try_send(OutboundFrame::Text(Arc::clone(&payload))) {
                Ok(()) => fan_out.delivered.push(connection.client_id()),
                Err(e) => {
                    warn!(client_id = %connection.client_id(), error = %e, "Error writing to connection");
                    self.registry.mark_offline(&connection);
                    fan_out.failed.push(connection.client_id());
                }
            }
        }
        fan_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Connection;
    use tokio::sync::mpsc;

    fn register(
        registry: &ConnectionRegistry,
        id: i64,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Connection::new(ClientId::new(id), tx));
        assert!(registry.register(Arc::clone(&conn)).is_accepted());
        (conn, rx)
    }

    fn message() -> ChatMessage {
        ChatMessage::new(ClientId::new(1), "lobby", "hi", 1, "proof")
    }

    #[tokio::test]
    async fn test_publish_reaches_every_online_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers: Vec<_> = (1..=5).map(|id| register(&registry, id, 16).1).collect();
        let router = BroadcastRouter::new(Arc::clone(&registry));

        let fan_out = router.publish(&message()).unwrap();

        assert_eq!(fan_out.delivered.len(), 5);
        assert!(fan_out.failed.is_empty());
        for rx in &mut receivers {
            let frame = rx.recv().await.unwrap();
            let decoded = ChatMessage::decode(frame.as_text().unwrap()).unwrap();
            assert_eq!(decoded, message());
            assert!(rx.try_recv().is_err(), "exactly one copy per connection");
        }
    }

    #[tokio::test]
    async fn test_failed_write_does_not_abort_fan_out() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_c1, mut rx1) = register(&registry, 1, 16);
        let (c2, rx2) = register(&registry, 2, 16);
        let (_c3, mut rx3) = register(&registry, 3, 16);
        drop(rx2);
        let router = BroadcastRouter::new(Arc::clone(&registry));

        let fan_out = router.publish(&message()).unwrap();

        assert_eq!(fan_out.failed, vec![ClientId::new(2)]);
        assert_eq!(fan_out.delivered.len(), 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx3.recv().await.is_some());
        assert!(!c2.is_online());
        // Still registered, just degraded
        assert_eq!(registry.connection_count(), 3);
    }

    #[tokio::test]
    async fn test_full_queue_marks_offline() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = register(&registry, 1, 1);
        let router = BroadcastRouter::new(Arc::clone(&registry));

        assert_eq!(router.publish(&message()).unwrap().delivered.len(), 1);
        let second = router.publish(&message()).unwrap();

        assert_eq!(second.failed, vec![ClientId::new(1)]);
        assert!(!conn.is_online());
    }

    #[tokio::test]
    async fn test_offline_connections_are_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, mut rx) = register(&registry, 1, 16);
        registry.mark_offline(&conn);
        let router = BroadcastRouter::new(Arc::clone(&registry));

        let fan_out = router.publish(&message()).unwrap();

        assert_eq!(fan_out, FanOut::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_to_others_skips_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_c1, mut rx1) = register(&registry, 1, 16);
        let (_c2, mut rx2) = register(&registry, 2, 16);
        let router = BroadcastRouter::new(Arc::clone(&registry));

        let fan_out = router.deliver_to_others(Arc::from("payload"), ClientId::new(1));

        assert_eq!(fan_out.delivered, vec![ClientId::new(2)]);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.recv().await.unwrap().as_text(), Some("payload"));
    }

    #[test]
    fn test_publish_with_empty_registry() {
        let router = BroadcastRouter::new(Arc::new(ConnectionRegistry::new()));
        let fan_out = router.publish(&message()).unwrap();
        assert_eq!(fan_out, FanOut::default());
    }

    #[test]
    fn test_delivered_to_others() {
        let fan_out = FanOut {
            delivered: vec![ClientId::new(1)],
            failed: vec![],
        };
        assert!(!fan_out.delivered_to_others(ClientId::new(1)));
        assert!(fan_out.delivered_to_others(ClientId::new(2)));
    }
}
