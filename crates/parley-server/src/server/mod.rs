use crate::auth::RegistrationSecrets;
use crate::db::{ClientRepository, Database};
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use parley_relay::RelayHub;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

mod routes;

const WELCOME: &str = "Welcome to the Parley WebSocket chat server!";

/// Server application state
pub struct AppState {
    /// Live connections and the delivery pipeline
    pub hub: Arc<RelayHub>,
    pub db: Arc<Database>,
    pub clients: Arc<ClientRepository>,
    pub secrets: Arc<RegistrationSecrets>,
}

impl AppState {
    pub fn new(
        hub: Arc<RelayHub>,
        db: Arc<Database>,
        clients: Arc<ClientRepository>,
        secrets: Arc<RegistrationSecrets>,
    ) -> Self {
        Self {
            hub,
            db,
            clients,
            secrets,
        }
    }
}

/// Serve HTTP on `listener` until `stop_token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    stop_token: CancellationToken,
) -> Result<()> {
    let app = create_router(state);

    let addr = listener.local_addr()?;
    info!("Starting Axum HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop_token.cancelled().await;
            info!("HTTP server received shutdown signal, draining connections");
        })
        .await?;

    Ok(())
}

/// Cancel `stop_token` on Ctrl-C or SIGTERM.
pub async fn shutdown_signal(stop_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
    stop_token.cancel();
}

fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .merge(routes::router())
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
}

async fn root_handler() -> &'static str {
    WELCOME
}

/// Simple health check endpoint (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connections = state.hub.registry().connection_count();
    let online = state.hub.registry().online_identities();
    match state.db.health_check().await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "parley-server",
                "version": env!("CARGO_PKG_VERSION"),
                "connections": connections,
                "online": online
            })),
        ),
        Ok(false) => {
            warn!("Health check: database unhealthy");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "parley-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "connections": connections,
                    "online": online,
                    "error": "database unhealthy"
                })),
            )
        }
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "parley-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "connections": connections,
                    "online": online,
                    "error": format!("database error: {}", e)
                })),
            )
        }
    }
}
