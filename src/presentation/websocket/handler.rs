//! WebSocket Connection Handler
//!
//! Upgrades an authenticated request and runs the connection lifecycle:
//! register with the hub, pump frames in both directions, unregister.

use axum::{
    extract::{ws::WebSocket, Extension, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::client::{read_loop, write_loop, Connection};
use super::hub::ClientHandle;
use crate::domain::User;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Response {
    // The display name is bound once for the connection's lifetime
    let user = match state.auth.find_user(auth.user_id).await {
        Ok(user) => user,
        Err(e) => return AppError::from(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, user: User) {
    let chat = &state.settings.chat;
    let conn = Connection {
        conn_id: Uuid::new_v4(),
        user_id: user.id,
        username: user.username,
        hub: state.hub.clone(),
        cancel: state.shutdown.child_token(),
    };

    let (tx, rx) = mpsc::channel(chat.outbound_capacity);
    let registered = conn
        .hub
        .register(ClientHandle {
            conn_id: conn.conn_id,
            user_id: conn.user_id,
            username: conn.username.clone(),
            tx,
            cancel: conn.cancel.clone(),
        })
        .await;

    if registered.is_err() {
        tracing::warn!(connection_id = %conn.conn_id, "Hub unavailable, dropping connection");
        return;
    }

    tracing::info!(
        user_id = %conn.user_id,
        connection_id = %conn.conn_id,
        "User connected"
    );

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        conn.cancel.clone(),
        chat.write_timeout(),
        chat.ping_period(),
    ));

    read_loop(stream, &conn, chat).await;

    // Unregistering closes the queue; the writer then closes the socket
    if tokio::time::timeout(chat.write_timeout(), writer).await.is_err() {
        conn.cancel.cancel();
    }

    tracing::info!(
        user_id = %conn.user_id,
        connection_id = %conn.conn_id,
        "User disconnected"
    );
}
