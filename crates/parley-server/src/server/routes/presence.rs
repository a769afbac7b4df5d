//! `GET /check_presence?client_id=N`

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use parley_relay::ClientId;
use serde::Deserialize;
use tracing::debug;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PresenceQuery {
    pub client_id: String,
}

/// 200 `present` while the client has an online connection, 404 `not_present` otherwise.
pub async fn check_presence_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PresenceQuery>,
) -> impl IntoResponse {
    let client_id: ClientId = match query.client_id.parse() {
        Ok(id) => id,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid client_id"),
    };

    let presence = state.hub.presence(client_id);
    debug!(client_id = %client_id, presence = %presence, "Presence check");
    if presence.is_online() {
        (StatusCode::OK, "present")
    } else {
        (StatusCode::NOT_FOUND, "not_present")
    }
}
