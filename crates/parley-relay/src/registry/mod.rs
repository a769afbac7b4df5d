//! Connection Registry for live message fan-out.
//!
//! This module tracks which clients currently hold an open connection, so the
//! broadcast router and the redelivery scheduler know where to push messages.
//!
//! ## Architecture
//!
//! Each session registers an outbound queue once it has authenticated. The
//! router takes a snapshot of the online entries and writes to each queue
//! without holding the registry lock.
//!
//! ```text
//! ConnectionSession (client 1) ──┐                       ┌── writer task (client 1) ── socket
//!                                ├─ ConnectionRegistry ──┤
//! ConnectionSession (client 2) ──┘   Mutex<HashMap<      └── writer task (client 2) ── socket
//!                                      ClientId, Arc<Connection>>>
//! ```

mod connection_registry;

pub use connection_registry::{Connection, ConnectionRegistry, Registration};
