//! HTTP API endpoints.
//!
//! Read-only views of the session plus a host control surface for operators
//! that do not want to hold a WebSocket open.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::SessionError;
use crate::state::SessionState;
use crate::types::*;

/// Public view of the running session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub version: u64,
    pub phase: SessionPhase,
    pub valid_transitions: Vec<SessionPhase>,
    pub round_no: u32,
    pub participants: Vec<ParticipantId>,
    pub accepted_participant: Option<ParticipantId>,
    pub deadline: Option<String>,
    pub questions_remaining: usize,
    pub buzz_port: u16,
}

impl SessionSummary {
    pub async fn collect(state: &SessionState) -> Self {
        let session = state.get_session().await;
        let round = session.current_round;
        Self {
            valid_transitions: SessionState::get_valid_transitions(&session.phase),
            session_id: session.id,
            version: session.version,
            phase: session.phase,
            round_no: session.round_no,
            participants: state.registry.snapshot().await.ids(),
            accepted_participant: round.as_ref().and_then(|r| r.accepted_participant.clone()),
            deadline: round.and_then(|r| r.phase_deadline),
            questions_remaining: state.questions_remaining().await,
            buzz_port: state.buzz_port(),
        }
    }
}

fn error_response(e: SessionError) -> Response {
    let status = match e {
        SessionError::UnknownParticipant(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::CONFLICT,
    };
    (
        status,
        Json(serde_json::json!({ "code": e.code(), "msg": e.to_string() })),
    )
        .into_response()
}

/// GET /api/session
pub async fn get_session(State(state): State<Arc<SessionState>>) -> Json<SessionSummary> {
    Json(SessionSummary::collect(&state).await)
}

/// GET /api/scores
///
/// Sorted by score descending.
pub async fn get_scores(State(state): State<Arc<SessionState>>) -> Json<Vec<ScoreEntry>> {
    Json(state.ledger.snapshot().await)
}

/// POST /api/host/start
pub async fn host_start(State(state): State<Arc<SessionState>>) -> Response {
    match state.start_session().await {
        Ok(()) => Json(SessionSummary::collect(&state).await).into_response(),
        Err(e) => {
            tracing::warn!("Start via API refused: {}", e);
            error_response(e)
        }
    }
}

/// POST /api/host/stop
pub async fn host_stop(State(state): State<Arc<SessionState>>) -> Response {
    match state.stop_session("stopped via API").await {
        Ok(()) => Json(SessionSummary::collect(&state).await).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/host/kick/{identity}
pub async fn host_kick(
    State(state): State<Arc<SessionState>>,
    Path(identity): Path<String>,
) -> Response {
    match state.kick(&identity).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
