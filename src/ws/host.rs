//! Host-only command handlers
//!
//! All handlers in this module require the Host role.
//! Authorization is checked in the main dispatch layer before calling these.

use crate::protocol::ServerMessage;
use crate::state::SessionState;
use std::sync::Arc;

/// Current phase as sent to hosts
pub async fn phase_message(state: &Arc<SessionState>) -> ServerMessage {
    let session = state.get_session().await;
    ServerMessage::Phase {
        phase: session.phase,
        round_no: session.round_no,
        deadline: session.current_round.and_then(|r| r.phase_deadline),
        server_now: chrono::Utc::now().to_rfc3339(),
    }
}

pub async fn handle_start(state: &Arc<SessionState>) -> Option<ServerMessage> {
    tracing::info!("Host starting session");
    match state.start_session().await {
        Ok(()) => Some(phase_message(state).await),
        Err(e) => {
            tracing::warn!("Start refused: {}", e);
            Some(e.into())
        }
    }
}

pub async fn handle_stop(state: &Arc<SessionState>) -> Option<ServerMessage> {
    tracing::info!("Host stopping session");
    match state.stop_session("stopped by host").await {
        Ok(()) => Some(phase_message(state).await),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_kick(state: &Arc<SessionState>, identity: &str) -> Option<ServerMessage> {
    match state.kick(identity).await {
        Ok(()) => Some(ServerMessage::Roster {
            participants: state.registry.snapshot().await.ids(),
        }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_get_scores(state: &Arc<SessionState>) -> Option<ServerMessage> {
    Some(ServerMessage::Scores {
        scores: state.ledger.snapshot().await,
    })
}
