//! The relay hub: owns the registry and wires the delivery pipeline.
//!
//! A [`RelayHub`] is created once per process and shared as `Arc<RelayHub>`
//! with every session and HTTP handler. Starting it spawns the two
//! background tasks, the publish worker and the redelivery scheduler, which
//! only meet through the registry and the store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::credentials::CredentialResolver;
use crate::error::RelayError;
use crate::publisher::{publish_queue, Publisher};
use crate::registry::{Connection, ConnectionRegistry, Registration};
use crate::router::BroadcastRouter;
use crate::scheduler::RedeliveryScheduler;
use crate::session::ConnectionSession;
use crate::store::MessageStore;
use crate::types::{ClientId, OutboundFrame, Presence};

pub struct RelayHub {
    registry: Arc<ConnectionRegistry>,
    publisher: Publisher,
    store: Arc<dyn MessageStore>,
    credentials: Arc<dyn CredentialResolver>,
    config: RelayConfig,
}

/// Handles to the hub's background tasks.
pub struct RelayTasks {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl RelayTasks {
    /// Stop the background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Relay task ended abnormally");
            }
        }
        info!("Relay tasks stopped");
    }
}

impl RelayHub {
    /// Build the hub and spawn its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: RelayConfig,
        store: Arc<dyn MessageStore>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> (Arc<Self>, RelayTasks) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(Arc::clone(&registry));
        let (publisher, worker) = publish_queue(router.clone(), config.publish_queue);
        let scheduler =
            RedeliveryScheduler::new(Arc::clone(&store), router, config.redelivery_interval);

        let shutdown = CancellationToken::new();
        let handles = vec![
            tokio::spawn(worker.run(shutdown.clone())),
            tokio::spawn(scheduler.run(shutdown.clone())),
        ];

        let hub = Arc::new(Self {
            registry,
            publisher,
            store,
            credentials,
            config,
        });
        (hub, RelayTasks { shutdown, handles })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialResolver> {
        &self.credentials
    }

    /// A fresh outbound queue sized from the config.
    pub fn outbound_channel(&self) -> (mpsc::Sender<OutboundFrame>, mpsc::Receiver<OutboundFrame>) {
        mpsc::channel(self.config.outbound_buffer.max(1))
    }

    /// Register a client's outbound queue.
    ///
    /// Fails with [`RelayError::DuplicateIdentity`] if the client already has
    /// a registered connection; the caller must then close its transport.
    pub fn register_connection(
        &self,
        client_id: ClientId,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<Arc<Connection>, RelayError> {
        let connection = Arc::new(Connection::new(client_id, outbound));
        match self.registry.register(Arc::clone(&connection)) {
            Registration::Accepted => {
                info!(client_id = %client_id, "Added connection for client");
                Ok(connection)
            }
            Registration::Rejected { .. } => Err(RelayError::DuplicateIdentity(client_id)),
        }
    }

    pub fn presence(&self, client_id: ClientId) -> Presence {
        if self.registry.is_online(client_id) {
            Presence::Online
        } else {
            Presence::Offline
        }
    }

    /// Start a session for a newly accepted transport.
    pub fn session(self: &Arc<Self>) -> ConnectionSession {
        ConnectionSession::new(Arc::clone(self))
    }
}
