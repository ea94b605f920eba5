pub mod handlers;
pub mod host;
pub mod participant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::SessionState;
use crate::types::Role;
use handlers::Connection;

const PROTOCOL_VERSION: &str = "1.0";

/// Participant WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SessionState>>,
) -> impl IntoResponse {
    tracing::info!("Participant WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, Role::Participant, state))
}

/// Host WebSocket upgrade handler (behind basic auth)
pub async fn host_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SessionState>>,
) -> impl IntoResponse {
    tracing::info!("Host WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, Role::Host, state))
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!("Failed to serialize {:?}: {}", msg, e);
            Ok(())
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, role: Role, state: Arc<SessionState>) {
    let (mut sender, mut receiver) = socket.split();
    tracing::info!("WebSocket connected with role: {:?}", role);

    let session = state.get_session().await;
    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        role,
        session_id: session.id,
        phase: session.phase,
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if send_json(&mut sender, &welcome).await.is_err() {
        tracing::error!("Failed to send welcome message");
        return;
    }

    // Messages addressed to this participant by the coordinator
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let mut conn = Connection::new(role, outbound_tx);

    // Subscribe to Host-specific broadcast if Host
    let mut host_broadcast_rx = if role == Role::Host {
        Some(state.subscribe_host())
    } else {
        None
    };

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(msg) = outbound else { break };
                let kicked = matches!(msg, ServerMessage::Kicked { .. });
                if send_json(&mut sender, &msg).await.is_err() {
                    tracing::warn!("Failed to push to {:?}", conn.identity());
                    break;
                }
                if kicked {
                    tracing::info!("Closing connection for {:?}", conn.identity());
                    let _ = sender.send(Message::Close(None)).await;
                    // The registry entry is already gone (or owned by a newer connection)
                    conn.participant = None;
                    break;
                }
            }

            // Handle Host-specific broadcasts
            host_msg = async {
                match &mut host_broadcast_rx {
                    Some(rx) => rx.recv().await.ok(),
                    None => {
                        // Non-Host: wait forever
                        std::future::pending::<Option<ServerMessage>>().await
                    }
                }
            } => {
                if let Some(msg) = host_msg {
                    if send_json(&mut sender, &msg).await.is_err() {
                        break;
                    }
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &mut conn, &state).await
                                {
                                    if send_json(&mut sender, &response).await.is_err() {
                                        tracing::error!("Failed to send response");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                let error = ServerMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                );
                                let _ = send_json(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(handle) = conn.participant.take() {
        state.leave(&handle).await;
    }
    tracing::info!("WebSocket connection closed for role: {:?}", role);
}
