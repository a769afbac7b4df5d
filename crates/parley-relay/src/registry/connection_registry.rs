//! Connection Registry implementation.
//!
//! Tracks live client connections by identity. At most one connection per
//! identity is registered at any time.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::TransportError;
use crate::types::{ClientId, ConnectionId, OutboundFrame};

/// A registered client connection.
///
/// The registry holds the connection; the owning session keeps its own
/// handle to the same outbound queue and removes the entry when its read
/// loop ends. Marking a connection offline also wakes that session so it
/// ends and the client can reconnect.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    client_id: ClientId,
    /// Queue drained by the connection's writer task
    outbound: mpsc::Sender<OutboundFrame>,
    /// Cleared when a write fails before the session has noticed the closure
    online: AtomicBool,
    /// Cancelled together with clearing `online`
    dropped: CancellationToken,
}

impl Connection {
    /// Create a connection entry. New connections start online.
    pub fn new(client_id: ClientId, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id: ConnectionId::new(),
            client_id,
            outbound,
            online: AtomicBool::new(true),
            dropped: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Resolves once the connection has been marked offline.
    pub async fn marked_offline(&self) {
        self.dropped.cancelled().await
    }

    /// Queue a frame without waiting.
    ///
    /// A full queue counts as a failed write, same as a closed one.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::Backpressure),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }
}

/// Outcome of [`ConnectionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The connection is now the identity's live entry
    Accepted,
    /// The identity already has a registered connection; the new one was not added
    Rejected {
        /// The connection that keeps the slot
        existing: ConnectionId,
    },
}

impl Registration {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Registration::Accepted)
    }
}

/// Registry of live client connections.
///
/// Every mutation and snapshot goes through one mutex. The lock is only held
/// for map access; callers write to sockets after copying a snapshot out.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ClientId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection for its client.
    ///
    /// Rejected if the client already has a registered connection, whether or
    /// not that connection has been marked offline. The existing entry is left
    /// untouched; the caller is expected to close the new transport.
    #[instrument(skip(self, connection), fields(client_id = %connection.client_id(), connection_id = %connection.id()))]
    pub fn register(&self, connection: Arc<Connection>) -> Registration {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(&connection.client_id) {
            info!(existing = %existing.id(), "Client is already connected, declining new connection");
            return Registration::Rejected {
                existing: existing.id(),
            };
        }
        connection.online.store(true, Ordering::Release);
        connections.insert(connection.client_id, connection);
        debug!("Registered connection");
        Registration::Accepted
    }

    /// Remove a client's connection.
    ///
    /// Idempotent. Only removes the entry if it is this exact connection, so
    /// cleanup by a rejected duplicate never evicts the live one.
    #[instrument(skip(self, connection), fields(client_id = %connection.client_id(), connection_id = %connection.id()))]
    pub fn unregister(&self, connection: &Connection) -> bool {
        let mut connections = self.connections.lock();
        match connections.get(&connection.client_id) {
            Some(current) if current.id() == connection.id() => {
                connections.remove(&connection.client_id);
                debug!("Unregistered connection");
                true
            }
            Some(_) => {
                debug!("Registered connection belongs to a newer session, leaving it");
                false
            }
            None => {
                debug!("Connection was not registered");
                false
            }
        }
    }

    /// Flag a connection as offline without removing it.
    ///
    /// Used when a write fails but the session has not yet observed the
    /// closure. The entry stays resolvable until the owning session, woken
    /// through [`Connection::marked_offline`], unregisters it.
    pub fn mark_offline(&self, connection: &Connection) {
        let connections = self.connections.lock();
        let was_online = connection.online.swap(false, Ordering::AcqRel);
        connection.dropped.cancel();
        let registered = connections
            .get(&connection.client_id)
            .is_some_and(|current| current.id() == connection.id());
        if was_online {
            warn!(
                client_id = %connection.client_id(),
                connection_id = %connection.id(),
                registered,
                "Marked connection offline"
            );
        }
    }

    /// Point-in-time copy of the online connections.
    ///
    /// Safe to iterate while doing I/O; the lock is released on return.
    pub fn snapshot_online(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .values()
            .filter(|connection| connection.is_online())
            .cloned()
            .collect()
    }

    /// Whether the client has a registered connection that is still online.
    pub fn is_online(&self, client_id: ClientId) -> bool {
        self.connections
            .lock()
            .get(&client_id)
            .is_some_and(|connection| connection.is_online())
    }

    /// Look up the registered connection for a client.
    pub fn get(&self, client_id: ClientId) -> Option<Arc<Connection>> {
        self.connections.lock().get(&client_id).cloned()
    }

    /// Number of registered connections, online or not.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Identities with an online connection, sorted.
    pub fn online_identities(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .connections
            .lock()
            .values()
            .filter(|connection| connection.is_online())
            .map(|connection| connection.client_id())
            .collect();
        ids.sort();
        ids
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connection_count())
            .finish()
    }
}
