//! End-to-end relay scenarios driven through in-process sessions.

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc as fmpsc;
use parley_relay::integrity;
use parley_relay::{
    ChatMessage, ClientCredentials, ClientId, InMemoryMessageStore, InboundFrame, OutboundFrame,
    Presence, RelayConfig, RelayHub, RelayTasks, Salt, SessionEnd, StaticCredentials,
    TransportError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct TestClient {
    id: ClientId,
    salt: Salt,
    inbound: fmpsc::UnboundedSender<Result<InboundFrame, TransportError>>,
    outbound: mpsc::Receiver<OutboundFrame>,
    handle: JoinHandle<SessionEnd>,
}

impl TestClient {
    fn send(&self, chat_id: &str, text: &str) {
        let proof = integrity::proof(text, &self.salt);
        let payload = ChatMessage::new(self.id, chat_id, text, 1_700_000_000_000, proof)
            .encode()
            .unwrap();
        self.inbound
            .unbounded_send(Ok(InboundFrame::Text(payload)))
            .unwrap();
    }

    fn send_raw(&self, payload: &str) {
        self.inbound
            .unbounded_send(Ok(InboundFrame::Text(payload.to_string())))
            .unwrap();
    }

    async fn next_text(&mut self) -> String {
        match tokio::time::timeout(Duration::from_secs(5), self.outbound.recv()).await {
            Ok(Some(OutboundFrame::Text(text))) => text.to_string(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    async fn next_message(&mut self) -> ChatMessage {
        let text = self.next_text().await;
        ChatMessage::decode(&text).unwrap()
    }

    async fn disconnect(self) -> SessionEnd {
        self.inbound.close_channel();
        self.handle.await.unwrap()
    }
}

struct Relay {
    hub: Arc<RelayHub>,
    tasks: RelayTasks,
    store: Arc<InMemoryMessageStore>,
}

impl Relay {
    fn start(config: RelayConfig) -> Self {
        let credentials = StaticCredentials::new();
        for id in 1..=3 {
            credentials.insert(
                format!("token-{id}"),
                ClientCredentials::new(ClientId::new(id), Salt::new(format!("salt-{id}"))),
            );
        }
        let store = Arc::new(InMemoryMessageStore::new());
        let (hub, tasks) = RelayHub::start(config, store.clone(), Arc::new(credentials));
        Self { hub, tasks, store }
    }

    async fn connect(&self, id: i64) -> TestClient {
        let mut session = self.hub.session();
        let client_id = session
            .authenticate(Some(&format!("Bearer token-{id}")))
            .await
            .unwrap();
        let (inbound, rx) = fmpsc::unbounded();
        let (tx, outbound) = self.hub.outbound_channel();
        let handle = tokio::spawn(async move { session.run(rx, tx).await });

        while !self.hub.registry().is_online(client_id) {
            tokio::task::yield_now().await;
        }
        TestClient {
            id: client_id,
            salt: Salt::new(format!("salt-{id}")),
            inbound,
            outbound,
            handle,
        }
    }
}

#[tokio::test]
async fn test_message_reaches_other_client_before_sender_ack() {
    let relay = Relay::start(RelayConfig::default());
    let mut alice = relay.connect(1).await;
    let mut bob = relay.connect(2).await;

    alice.send("lobby", "hello bob");

    let echo = alice.next_message().await;
    assert_eq!(echo.text, "hello bob");
    let ack = alice.next_text().await;
    assert!(ack.starts_with("Message from client 1 received at "));

    // Bob's copy was queued before Alice's acknowledgment
    let frame = bob.outbound.try_recv().unwrap();
    let received = ChatMessage::decode(frame.as_text().unwrap()).unwrap();
    assert_eq!(received.sender, ClientId::new(1));
    assert_eq!(received.chat_id, "lobby");
    assert_eq!(received.text, "hello bob");

    let stored = relay.store.all();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].delivered);

    relay.tasks.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_message_redelivered_once_recipient_connects() {
    let relay = Relay::start(RelayConfig::default());
    let mut alice = relay.connect(1).await;

    alice.send("lobby", "anyone there?");
    let _echo = alice.next_message().await;
    let _ack = alice.next_text().await;
    assert_eq!(alice.disconnect().await, SessionEnd::PeerClosed);

    let stored = relay.store.all();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].delivered);

    // Nobody online: ticks leave it pending
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(!relay.store.all()[0].delivered);

    let mut bob = relay.connect(2).await;
    tokio::time::sleep(Duration::from_secs(4)).await;

    let redelivered = bob.next_message().await;
    assert_eq!(redelivered.text, "anyone there?");
    assert!(relay.store.all()[0].delivered);

    // Delivered messages are not pushed again
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(bob.outbound.try_recv().is_err());

    relay.tasks.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_message_sent_alone_waits_for_another_client() {
    let relay = Relay::start(RelayConfig::default());
    let mut alice = relay.connect(1).await;

    alice.send("lobby", "anyone?");
    assert_eq!(alice.next_message().await.text, "anyone?");
    let _ack = alice.next_text().await;

    // Alice stays connected across several ticks and gets no extra copies
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(alice.outbound.try_recv().is_err());
    assert!(!relay.store.all()[0].delivered);

    let mut bob = relay.connect(2).await;
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(bob.next_message().await.text, "anyone?");
    assert!(relay.store.all()[0].delivered);
    assert!(alice.outbound.try_recv().is_err());

    relay.tasks.shutdown().await;
}

#[tokio::test]
async fn test_presence_follows_connection_lifecycle() {
    let relay = Relay::start(RelayConfig::default());
    let id = ClientId::new(3);
    assert_eq!(relay.hub.presence(id), Presence::Offline);

    let carol = relay.connect(3).await;
    assert_eq!(relay.hub.presence(id), Presence::Online);

    carol.disconnect().await;
    assert_eq!(relay.hub.presence(id), Presence::Offline);

    // Reconnecting after a clean disconnect is allowed
    let _carol = relay.connect(3).await;
    assert_eq!(relay.hub.presence(id), Presence::Online);

    relay.tasks.shutdown().await;
}

#[tokio::test]
async fn test_second_connection_for_same_client_rejected() {
    let relay = Relay::start(RelayConfig::default());
    let mut alice = relay.connect(1).await;
    let mut bob = relay.connect(2).await;

    let mut duplicate = relay.hub.session();
    duplicate.authenticate(Some("Bearer token-1")).await.unwrap();
    let (_inbound, rx) = fmpsc::unbounded();
    let (tx, mut outbound) = relay.hub.outbound_channel();

    assert_eq!(duplicate.run(rx, tx).await, SessionEnd::Rejected);
    assert_eq!(
        outbound.recv().await,
        Some(OutboundFrame::Close {
            reason: "Client already connected".to_string()
        })
    );

    // The first connection keeps working
    alice.send("lobby", "still here");
    assert_eq!(alice.next_message().await.text, "still here");
    assert!(alice.next_text().await.starts_with("Message from client 1"));
    assert_eq!(bob.next_message().await.text, "still here");

    relay.tasks.shutdown().await;
}

#[tokio::test]
async fn test_tampered_message_dropped_connection_kept() {
    let relay = Relay::start(RelayConfig::default());
    let mut alice = relay.connect(1).await;
    let mut bob = relay.connect(2).await;

    let forged = ChatMessage::new(
        ClientId::new(1),
        "lobby",
        "forged",
        0,
        integrity::proof("untouched", &Salt::new("salt-1")),
    );
    alice.send_raw(&forged.encode().unwrap());
    alice.send_raw("{\"chatId\":");
    alice.send("lobby", "genuine");

    assert_eq!(alice.next_message().await.text, "genuine");
    assert_eq!(bob.next_message().await.text, "genuine");
    let stored = relay.store.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message.text, "genuine");

    relay.tasks.shutdown().await;
}

#[tokio::test]
async fn test_lagging_recipient_dropped_then_reconnects() {
    let relay = Relay::start(RelayConfig {
        outbound_buffer: 1,
        ..RelayConfig::default()
    });
    let mut alice = relay.connect(1).await;
    let lagging = relay.connect(2).await;
    let mut carol = relay.connect(3).await;

    alice.send("lobby", "one");
    assert_eq!(alice.next_message().await.text, "one");
    let _ack = alice.next_text().await;
    assert_eq!(carol.next_message().await.text, "one");

    // The lagging client has not read, so its single slot is still full
    alice.send("lobby", "two");
    assert_eq!(alice.next_message().await.text, "two");
    let _ack = alice.next_text().await;
    assert_eq!(carol.next_message().await.text, "two");

    // Its session ends and gives up the slot
    let TestClient {
        outbound: mut lagging_out,
        handle,
        ..
    } = lagging;
    assert_eq!(handle.await.unwrap(), SessionEnd::MarkedOffline);
    assert_eq!(relay.hub.presence(ClientId::new(2)), Presence::Offline);
    assert!(relay.hub.registry().get(ClientId::new(2)).is_none());

    // Whatever was queued still drains, then the queue closes
    let queued = lagging_out.recv().await.unwrap();
    assert_eq!(ChatMessage::decode(queued.as_text().unwrap()).unwrap().text, "one");
    assert_eq!(lagging_out.recv().await, None);

    let mut caught_up = relay.connect(2).await;
    alice.send("lobby", "three");
    assert_eq!(alice.next_message().await.text, "three");
    let _ack = alice.next_text().await;
    assert_eq!(carol.next_message().await.text, "three");
    assert_eq!(caught_up.next_message().await.text, "three");

    relay.tasks.shutdown().await;
}
