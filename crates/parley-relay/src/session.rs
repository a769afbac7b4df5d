//! Per-connection session: authenticate, register, read loop, cleanup.
//!
//! ```text
//! Connecting ──authenticate──▶ Authenticating ──run/register──▶ Registered
//!      │                             │                              │
//!      └─────────────────────────────┴──────────────┬───────────────┘
//!                                                   ▼
//!                                                Closed
//! ```
//!
//! A session is transport-agnostic: it reads [`InboundFrame`]s from any
//! stream and writes [`OutboundFrame`]s to the connection's outbound queue,
//! which a writer task owned by the transport layer drains.

use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credentials::bearer_token;
use crate::error::{AuthError, RelayError, StoreError, TransportError};
use crate::hub::RelayHub;
use crate::integrity;
use crate::router::FanOut;
use crate::registry::Connection;
use crate::types::{
    ChatMessage, ClientCredentials, ClientId, InboundFrame, OutboundFrame, StoredMessage,
};

/// Close reason sent to a second connection for an already-connected client.
pub const ALREADY_CONNECTED: &str = "Client already connected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Registered,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection or the inbound stream ended
    PeerClosed,
    /// Reading from or writing to the transport failed
    TransportFailed(TransportError),
    /// A broadcast write to this connection failed and it was marked offline
    MarkedOffline,
    /// The client already had a registered connection
    Rejected,
    /// `run` was called without a successful `authenticate`
    Unauthenticated,
}

pub struct ConnectionSession {
    hub: Arc<RelayHub>,
    state: SessionState,
    credentials: Option<ClientCredentials>,
}

impl ConnectionSession {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self {
            hub,
            state: SessionState::Connecting,
            credentials: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The authenticated client, once known.
    pub fn client_id(&self) -> Option<ClientId> {
        self.credentials.as_ref().map(|c| c.client_id)
    }

    /// Resolve the `Authorization` header value to a client.
    ///
    /// On failure the session is closed and never reaches the registry.
    pub async fn authenticate(&mut self, authorization: Option<&str>) -> Result<ClientId, RelayError> {
        if self.state != SessionState::Connecting {
            warn!(state = ?self.state, "Authentication attempted twice");
            return Err(AuthError::InvalidToken.into());
        }
        self.transition(SessionState::Authenticating);

        let resolved = match bearer_token(authorization) {
            Ok(token) => self.hub.credentials().resolve(token).await,
            Err(e) => Err(e),
        };

        match resolved {
            Ok(credentials) => {
                let client_id = credentials.client_id;
                debug!(client_id = %client_id, "Client authenticated");
                self.credentials = Some(credentials);
                Ok(client_id)
            }
            Err(e) => {
                warn!(error = %e, "Failed to authenticate client");
                self.transition(SessionState::Closed);
                Err(e.into())
            }
        }
    }

    /// Register the connection and process inbound frames until the
    /// transport ends.
    ///
    /// Always leaves the session `Closed`, with the registry entry removed
    /// and a close frame queued for the writer.
    pub async fn run<R>(&mut self, mut inbound: R, outbound: mpsc::Sender<OutboundFrame>) -> SessionEnd
    where
        R: Stream<Item = Result<InboundFrame, TransportError>> + Unpin,
    {
        let credentials = match self.credentials.clone() {
            Some(credentials) if self.state == SessionState::Authenticating => credentials,
            _ => {
                warn!(state = ?self.state, "Session run without authentication");
                close_transport(&outbound, "Unauthorized");
                self.transition(SessionState::Closed);
                return SessionEnd::Unauthenticated;
            }
        };
        let client_id = credentials.client_id;

        let connection = match self.hub.register_connection(client_id, outbound.clone()) {
            Ok(connection) => connection,
            Err(e) => {
                info!(client_id = %client_id, error = %e, "Declining new connection attempt");
                close_transport(&outbound, ALREADY_CONNECTED);
                self.transition(SessionState::Closed);
                return SessionEnd::Rejected;
            }
        };
        self.transition(SessionState::Registered);

        let end = self.read_loop(&credentials, &connection, &mut inbound, &outbound).await;

        self.hub.registry().unregister(&connection);
        info!(client_id = %client_id, reason = ?end, "Client disconnected");
        close_transport(&outbound, "Connection closed");
        self.transition(SessionState::Closed);
        end
    }

    /// Read frames until the peer goes away or a write to this connection
    /// fails elsewhere and marks it offline.
    async fn read_loop<R>(
        &self,
        credentials: &ClientCredentials,
        connection: &Connection,
        inbound: &mut R,
        outbound: &mpsc::Sender<OutboundFrame>,
    ) -> SessionEnd
    where
        R: Stream<Item = Result<InboundFrame, TransportError>> + Unpin,
    {
        loop {
            let frame = tokio::select! {
                biased;
                _ = connection.marked_offline() => {
                    info!(client_id = %credentials.client_id, "Connection fell behind, ending session");
                    return SessionEnd::MarkedOffline;
                }
                frame = inbound.next() => match frame {
                    Some(frame) => frame,
                    None => return SessionEnd::PeerClosed,
                },
            };
            let payload = match frame {
                Ok(InboundFrame::Text(text)) => text,
                Ok(InboundFrame::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(client_id = %credentials.client_id, error = %e, "Dropping non-UTF-8 frame");
                        continue;
                    }
                },
                Ok(InboundFrame::Close) => return SessionEnd::PeerClosed,
                Err(e) => {
                    warn!(client_id = %credentials.client_id, error = %e, "Error reading from connection");
                    return SessionEnd::TransportFailed(e);
                }
            };

            if let Err(e) = self.handle_message(credentials, &payload, outbound).await {
                warn!(client_id = %credentials.client_id, error = %e, "Error sending acknowledgment");
                return SessionEnd::TransportFailed(e);
            }
        }
    }

    /// Decode, verify, broadcast and store one message, then acknowledge it.
    ///
    /// Undecodable frames and bad proofs are dropped without telling the
    /// sender. Only a failed acknowledgment write is returned as an error.
    async fn handle_message(
        &self,
        credentials: &ClientCredentials,
        payload: &str,
        outbound: &mpsc::Sender<OutboundFrame>,
    ) -> Result<(), TransportError> {
        let mut message = match ChatMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(client_id = %credentials.client_id, error = %e, "Error decoding message");
                return Ok(());
            }
        };
        message.sender = credentials.client_id;

        if integrity::verify(&message, &credentials.salt).is_err() {
            return Ok(());
        }

        info!(
            client_id = %message.sender,
            chat_id = %message.chat_id,
            len = message.text.len(),
            "Received message"
        );

        let (fan_out, stored) = tokio::join!(
            self.hub.publisher().publish(message.clone()),
            self.hub.store().append(&message),
        );
        self.record_delivery(&message, fan_out, stored).await;

        let ack = format!(
            "Message from client {} received at {}",
            message.sender,
            Utc::now().to_rfc3339()
        );
        outbound
            .send(OutboundFrame::text(ack))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Mark the stored copy delivered if the live broadcast reached anyone
    /// besides the sender. Otherwise the scheduler picks it up.
    async fn record_delivery(
        &self,
        message: &ChatMessage,
        fan_out: Result<FanOut, RelayError>,
        stored: Result<StoredMessage, StoreError>,
    ) {
        let stored = match stored {
            Ok(stored) => stored,
            Err(e) => {
                warn!(client_id = %message.sender, error = %e, "Storing message failed");
                return;
            }
        };

        match fan_out {
            Ok(fan_out) if fan_out.delivered_to_others(message.sender) => {
                if let Err(e) = self.hub.store().mark_delivered(stored.id).await {
                    warn!(message_id = %stored.id, error = %e, "Failed to update message status");
                }
            }
            Ok(_) => debug!(message_id = %stored.id, "No other recipient online, left for redelivery"),
            Err(e) => warn!(message_id = %stored.id, error = %e, "Broadcast failed"),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == SessionState::Closed {
            return;
        }
        debug!(from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }
}

fn close_transport(outbound: &mpsc::Sender<OutboundFrame>, reason: &str) {
    if outbound
        .try_send(OutboundFrame::Close {
            reason: reason.to_string(),
        })
        .is_err()
    {
        debug!("Writer already gone, nothing to close");
    }
}
