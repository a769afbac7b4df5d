//! # parley-relay
//!
//! Live connection registry and delivery pipeline for the Parley relay.
//!
//! This crate holds everything that does not care about HTTP or SQL: it is
//! embedded in `parley-server`, which supplies the websocket transport, the
//! credential store and the durable message store.
//!
//! ## Architecture
//!
//! - **Registry**: at most one live connection per client, with an online flag
//! - **Router**: fans a message out to a snapshot of online connections
//! - **Publisher**: queue in front of the router, so sessions never touch the
//!   registry lock directly
//! - **Scheduler**: periodically pushes undelivered stored messages
//! - **Session**: authenticate, register, verify, broadcast, store, acknowledge
//!
//! Outbound writes never block: each connection owns a bounded queue drained
//! by its transport's writer task, and a full or closed queue marks that
//! connection offline.

pub mod config;
pub mod credentials;
pub mod hub;
pub mod integrity;
pub mod publisher;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod store;

mod error;
mod types;

pub use config::RelayConfig;
pub use credentials::{bearer_token, CredentialResolver, StaticCredentials};
pub use error::{AuthError, RelayError, StoreError, TransportError};
pub use hub::{RelayHub, RelayTasks};
pub use publisher::Publisher;
pub use registry::{Connection, ConnectionRegistry, Registration};
pub use router::{BroadcastRouter, FanOut};
pub use scheduler::{RedeliveryScheduler, TickReport};
pub use session::{ConnectionSession, SessionEnd, SessionState};
pub use store::{InMemoryMessageStore, MessageStore};
pub use types::*;
