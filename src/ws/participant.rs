//! Participant message handlers
//!
//! Outcomes of buzzes and answers (accept, reject, correct, ...) are pushed
//! through the participant's outbound channel by the state machine, so these
//! handlers only answer with errors.

use super::handlers::Connection;
use crate::error::SessionError;
use crate::protocol::ServerMessage;
use crate::state::SessionState;
use crate::types::AnswerChoice;
use std::sync::Arc;

pub async fn handle_join(
    state: &Arc<SessionState>,
    conn: &mut Connection,
    identity: Option<String>,
) -> Option<ServerMessage> {
    if let Some(existing) = conn.identity() {
        tracing::warn!("{} sent a second join", existing);
        return Some(ServerMessage::error(
            "ALREADY_JOINED",
            format!("Already joined as {}", existing),
        ));
    }

    tracing::info!("Join request: {:?}", identity);
    match state.join(identity.as_deref(), conn.outbound()).await {
        Ok(handle) => {
            let identity = handle.id.clone();
            conn.participant = Some(handle);
            Some(ServerMessage::Joined {
                identity,
                buzz_port: state.buzz_port(),
                phase: state.phase().await,
            })
        }
        Err(e) => {
            tracing::warn!("Join refused: {}", e);
            Some(e.into())
        }
    }
}

/// Reliable-channel race signal; same queue as the UDP path
pub async fn handle_buzz(state: &Arc<SessionState>, id: &str) -> Option<ServerMessage> {
    state.handle_buzz(id).await;
    None
}

pub async fn handle_answer(
    state: &Arc<SessionState>,
    id: &str,
    option: AnswerChoice,
) -> Option<ServerMessage> {
    match state.submit_answer(id, option).await {
        Ok(correct) => {
            tracing::debug!("Answer from {} evaluated (correct: {})", id, correct);
            None
        }
        // Not consumed, so the participant may still pick a real option
        Err(e @ SessionError::InvalidOption(_)) => Some(e.into()),
        Err(e) => {
            tracing::warn!("Ignoring answer from {}: {}", id, e);
            None
        }
    }
}
