//! Database module for Parley Server
//!
//! This module provides a libSQL database layer with:
//! - A single database for clients, chats and messages
//! - Automatic schema migrations
//! - Health check capabilities
//!
//! In-memory databases are private to the connection that created them, so
//! an in-memory [`Database`] keeps one persistent connection behind a mutex
//! and hands that out to every caller. File databases open a fresh
//! connection per call.

mod clients;
mod messages;
mod migrations;

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use libsql::{Connection, Database as LibSqlDatabase};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

pub use clients::ClientRepository;
pub use messages::SqlMessageStore;
pub use migrations::MigrationRunner;

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(#[from] libsql::Error),
}

/// Wrapper around a libsql database
#[derive(Clone)]
pub struct Database {
    db: Arc<LibSqlDatabase>,
    name: String,
    persistent: Option<Arc<Mutex<Connection>>>,
}

/// A connection borrowed from a [`Database`].
pub enum ConnectionHandle<'a> {
    /// The in-memory database's only connection, held for the handle's lifetime
    Persistent(MutexGuard<'a, Connection>),
    /// A fresh connection to a file database
    Owned(Connection),
}

impl Deref for ConnectionHandle<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            ConnectionHandle::Persistent(guard) => &**guard,
            ConnectionHandle::Owned(conn) => conn,
        }
    }
}

impl Database {
    /// Create a new in-memory database
    #[instrument(skip_all)]
    pub async fn in_memory(name: &str) -> Result<Self, DatabaseError> {
        debug!("Creating in-memory database: {}", name);
        let db = libsql::Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        Ok(Self {
            db: Arc::new(db),
            name: name.to_string(),
            persistent: Some(Arc::new(Mutex::new(conn))),
        })
    }

    /// Create or open a local file-based database
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_local(name: &str, path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        debug!("Opening local database '{}' at: {:?}", name, path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionFailed(format!("Failed to create database directory: {}", e))
            })?;
        }

        let db = libsql::Builder::new_local(path).build().await?;

        info!("Opened database '{}' at {:?}", name, path);
        Ok(Self {
            db: Arc::new(db),
            name: name.to_string(),
            persistent: None,
        })
    }

    /// Open a new connection, bypassing the persistent one
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        Ok(self.db.connect()?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A connection that sees this database's data
    pub async fn connection(&self) -> Result<ConnectionHandle<'_>, DatabaseError> {
        match &self.persistent {
            Some(persistent) => Ok(ConnectionHandle::Persistent(persistent.lock().await)),
            None => Ok(ConnectionHandle::Owned(self.connect()?)),
        }
    }

    /// Check if the database is healthy by executing a simple query
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn health_check(&self) -> Result<bool, DatabaseError> {
        let conn = self.connection().await?;
        match conn.query("SELECT 1", ()).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}
