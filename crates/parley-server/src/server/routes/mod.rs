// Route modules for Parley Server
pub mod presence; // Presence lookups against the live registry
pub mod register; // One-time-secret client registration
pub mod websocket; // Authenticated WebSocket sessions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use serde::Serialize;

use super::AppState;

/// Error body returned by the JSON routes
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register::register_handler))
        .route("/check_presence", get(presence::check_presence_handler))
        .route("/ws", get(websocket::websocket_handler))
}
