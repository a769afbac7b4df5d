use std::sync::Arc;

use anyhow::Result;
use parley_relay::RelayHub;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod auth;
mod config;
mod db;
mod server;
mod telemetry;

use auth::{RegistrationSecrets, TokenIssuer};
use config::ServerConfig;
use db::{ClientRepository, Database, MigrationRunner, SqlMessageStore};
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init().map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Parley Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("License: AGPL-3.0");

    let config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load server configuration: {}", e))?;
    config.log_config();

    let db = match &config.database_path {
        Some(path) => Database::open_local("parley", path).await,
        None => Database::in_memory("parley").await,
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize database: {}", e))?;

    MigrationRunner::parley()
        .run(&db)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database initialized and migrations complete");
    let db = Arc::new(db);

    let secrets = match &config.secrets_file {
        Some(path) => RegistrationSecrets::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load registration secrets: {}", e))?,
        None => RegistrationSecrets::default(),
    };
    if secrets.is_empty() {
        warn!("No registration secrets loaded, registration is closed");
    }

    let tokens = match &config.token_key {
        Some(key) => TokenIssuer::new(key.as_bytes(), config.token_ttl),
        None => TokenIssuer::random(config.token_ttl),
    };
    let clients = Arc::new(ClientRepository::new(Arc::clone(&db), Arc::new(tokens)));
    let store = Arc::new(SqlMessageStore::new(Arc::clone(&db)));

    let (hub, tasks) = RelayHub::start(config.relay.clone(), store, clients.clone());
    let state = Arc::new(AppState::new(hub, db, clients, Arc::new(secrets)));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", config.bind_addr, e))?;

    let stop_token = CancellationToken::new();
    tokio::spawn(server::shutdown_signal(stop_token.clone()));

    server::serve(listener, state, stop_token).await?;

    tasks.shutdown().await;
    telemetry::shutdown();

    Ok(())
}
