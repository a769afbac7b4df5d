//! Chat over WebSocket
//!
//! The bearer token is checked before the upgrade, so a bad token gets a
//! plain 401 instead of a socket. After the upgrade the socket is split: a
//! writer task drains the connection's outbound queue into the sink while
//! the relay session reads from the stream.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{
            close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket,
            WebSocketUpgrade,
        },
        State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{future, stream::SplitSink, SinkExt, StreamExt};
use parley_relay::{
    AuthError, ConnectionSession, InboundFrame, OutboundFrame, RelayError, RelayHub,
    TransportError,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// GET /ws
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

    let mut session = state.hub.session();
    let client_id = match session.authenticate(authorization).await {
        Ok(client_id) => client_id,
        Err(RelayError::Auth(AuthError::Lookup(e))) => {
            error!(error = %e, "Credential lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Credential lookup failed").into_response();
        }
        Err(RelayError::Auth(e)) => return (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(client_id = %client_id, error = %rejection, "WebSocket upgrade rejected");
            return rejection.into_response();
        }
    };

    info!(client_id = %client_id, "WebSocket connection request");
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, session, hub))
}

async fn handle_socket(socket: WebSocket, mut session: ConnectionSession, hub: Arc<RelayHub>) {
    let (sink, stream) = socket.split();
    let (outbound, rx) = hub.outbound_channel();
    let writer = tokio::spawn(write_frames(sink, rx));

    let inbound = stream.filter_map(|msg| future::ready(inbound_frame(msg)));
    let end = session.run(inbound, outbound).await;
    debug!(client_id = ?session.client_id(), reason = ?end, "Session finished");

    if let Err(e) = writer.await {
        warn!(error = %e, "WebSocket writer ended abnormally");
    }
}

/// Map a socket message to a relay frame. Ping and pong are answered by the
/// socket itself and never reach the session.
fn inbound_frame(msg: Result<Message, axum::Error>) -> Option<Result<InboundFrame, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text))),
        Ok(Message::Binary(bytes)) => Some(Ok(InboundFrame::Binary(bytes))),
        Ok(Message::Close(_)) => Some(Ok(InboundFrame::Close)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(Err(TransportError::io(e.to_string()))),
    }
}

/// Drain the outbound queue into the socket until a close frame or a write
/// error. Dropping `rx` on exit makes further writes to this connection fail.
async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<OutboundFrame>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.to_string())).await {
                    debug!(error = %e, "Failed to send WebSocket message");
                    break;
                }
            }
            OutboundFrame::Close { reason } => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: Cow::Owned(reason),
                }));
                if let Err(e) = sink.send(close).await {
                    debug!(error = %e, "Failed to send close frame");
                }
                break;
            }
        }
    }
}
