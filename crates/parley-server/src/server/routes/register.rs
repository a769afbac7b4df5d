//! `POST /register`

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use super::ErrorResponse;
use crate::auth::{validate_username, CredentialError};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub secret: String,
    pub username: String,
}

fn credential_error_to_response(err: CredentialError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        CredentialError::InvalidSecret => (StatusCode::UNAUTHORIZED, "invalid_secret"),
        CredentialError::InvalidUsername(_) => (StatusCode::BAD_REQUEST, "invalid_username"),
        CredentialError::UsernameTaken(_) => (StatusCode::CONFLICT, "username_taken"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "registration_failed"),
    };
    (status, Json(ErrorResponse::new(code, &err.to_string())))
}

/// Register a client with a one-time secret.
///
/// The secret is consumed only when the client row is written.
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection, "Malformed registration request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("invalid_request", &rejection.body_text())),
            )
                .into_response();
        }
    };

    if !state.secrets.is_valid(&request.secret) {
        warn!(username = %request.username, "Registration with invalid secret");
        return credential_error_to_response(CredentialError::InvalidSecret).into_response();
    }
    if let Err(e) = validate_username(&request.username) {
        return credential_error_to_response(e).into_response();
    }
    if !state.secrets.consume(&request.secret) {
        // Another registration took it in the meantime
        return credential_error_to_response(CredentialError::InvalidSecret).into_response();
    }

    match state.clients.register(&request.username).await {
        Ok(client) => {
            info!(client_id = %client.id, "Client has been registered");
            (StatusCode::OK, Json(client)).into_response()
        }
        Err(e) => {
            state.secrets.restore(&request.secret);
            warn!(username = %request.username, error = %e, "Registration failed");
            credential_error_to_response(e).into_response()
        }
    }
}
