//! WebSocket message dispatch
//!
//! This module provides the main entry point for handling client messages.
//! Authorization is checked here, then dispatched to role-specific handler modules.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{ParticipantHandle, SessionState};
use crate::types::Role;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{host, participant};

/// Per-connection state owned by the socket task
#[derive(Debug)]
pub struct Connection {
    pub role: Role,
    /// Set once a participant has joined
    pub participant: Option<ParticipantHandle>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl Connection {
    pub fn new(role: Role, outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            role,
            participant: None,
            outbound,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.participant.as_ref().map(|p| p.id.as_str())
    }

    pub(crate) fn outbound(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.outbound.clone()
    }
}

/// Macro to check host authorization and return early if unauthorized
macro_rules! check_host {
    ($conn:expr, $action:expr) => {
        if $conn.role != Role::Host {
            return Some(ServerMessage::error(
                "UNAUTHORIZED",
                format!("Only host can {}", $action),
            ));
        }
    };
}

/// Macro to resolve the joined identity or return early
macro_rules! joined_identity {
    ($conn:expr) => {
        match $conn.identity() {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!("Message before join on {:?} connection", $conn.role);
                return Some(ServerMessage::error("NOT_JOINED", "Send join first"));
            }
        }
    };
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &mut Connection,
    state: &Arc<SessionState>,
) -> Option<ServerMessage> {
    match msg {
        // Participant messages
        ClientMessage::Join { identity } => {
            if conn.role != Role::Participant {
                return Some(ServerMessage::error(
                    "UNAUTHORIZED",
                    "Only participants can join",
                ));
            }
            participant::handle_join(state, conn, identity).await
        }

        ClientMessage::Buzz => {
            let id = joined_identity!(conn);
            participant::handle_buzz(state, &id).await
        }

        ClientMessage::Answer { option } => {
            let id = joined_identity!(conn);
            participant::handle_answer(state, &id, option).await
        }

        // Host-only commands (authorization checked before dispatch)
        ClientMessage::HostStart => {
            check_host!(conn, "start the session");
            host::handle_start(state).await
        }

        ClientMessage::HostStop => {
            check_host!(conn, "stop the session");
            host::handle_stop(state).await
        }

        ClientMessage::HostKick { identity } => {
            check_host!(conn, "kick participants");
            host::handle_kick(state, &identity).await
        }

        ClientMessage::HostGetScores => {
            check_host!(conn, "read scores");
            host::handle_get_scores(state).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::QuestionBank;
    use crate::types::{AnswerChoice, Question, SessionConfig, SessionPhase};

    fn state() -> Arc<SessionState> {
        let question = Question {
            prompt: "2 + 2?".to_string(),
            options: ["3", "4", "5", "22"].map(String::from),
            correct_index: 1,
        };
        Arc::new(SessionState::new(
            SessionConfig::default(),
            QuestionBank::new(vec![question]),
        ))
    }

    fn connection(role: Role) -> (Connection, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(role, tx), rx)
    }

    #[tokio::test]
    async fn test_unauthorized_host_command() {
        let state = state();
        let (mut conn, _rx) = connection(Role::Participant);

        let result = handle_message(ClientMessage::HostStart, &mut conn, &state).await;

        if let Some(ServerMessage::Error { code, .. }) = result {
            assert_eq!(code, "UNAUTHORIZED");
        } else {
            panic!("Expected Error message");
        }
        assert_eq!(state.phase().await, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_messages_before_join_are_refused() {
        let state = state();
        let (mut conn, _rx) = connection(Role::Participant);

        for msg in [
            ClientMessage::Buzz,
            ClientMessage::Answer {
                option: AnswerChoice::Index(1),
            },
        ] {
            let result = handle_message(msg, &mut conn, &state).await;
            assert!(matches!(
                result,
                Some(ServerMessage::Error { ref code, .. }) if code == "NOT_JOINED"
            ));
        }
    }

    #[tokio::test]
    async fn test_join_assigns_identity() {
        let state = state();
        state.set_buzz_port(7001);
        let (mut conn, _rx) = connection(Role::Participant);

        let result =
            handle_message(ClientMessage::Join { identity: None }, &mut conn, &state).await;

        match result {
            Some(ServerMessage::Joined {
                identity,
                buzz_port,
                phase,
            }) => {
                assert!(identity.starts_with("P-"));
                assert_eq!(conn.identity(), Some(identity.as_str()));
                assert_eq!(buzz_port, 7001);
                assert_eq!(phase, SessionPhase::Idle);
            }
            other => panic!("Expected Joined message, got {:?}", other),
        }

        let again = handle_message(
            ClientMessage::Join {
                identity: Some("alice".to_string()),
            },
            &mut conn,
            &state,
        )
        .await;
        assert!(matches!(
            again,
            Some(ServerMessage::Error { ref code, .. }) if code == "ALREADY_JOINED"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_refused() {
        let state = state();
        let (mut first, _rx1) = connection(Role::Participant);
        let (mut second, _rx2) = connection(Role::Participant);
        let join = || ClientMessage::Join {
            identity: Some("alice".to_string()),
        };

        handle_message(join(), &mut first, &state).await;
        let result = handle_message(join(), &mut second, &state).await;

        assert!(matches!(
            result,
            Some(ServerMessage::Error { ref code, .. }) if code == "DUPLICATE_IDENTITY"
        ));
        assert!(second.participant.is_none());
    }

    #[tokio::test]
    async fn test_host_cannot_join() {
        let state = state();
        let (mut conn, _rx) = connection(Role::Host);

        let result =
            handle_message(ClientMessage::Join { identity: None }, &mut conn, &state).await;

        assert!(matches!(
            result,
            Some(ServerMessage::Error { ref code, .. }) if code == "UNAUTHORIZED"
        ));
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_host_start_and_stop() {
        let state = state();
        state.open_lobby().await.unwrap();
        let (mut host, _rx) = connection(Role::Host);

        let result = handle_message(ClientMessage::HostStart, &mut host, &state).await;
        assert!(matches!(
            result,
            Some(ServerMessage::Phase {
                phase: SessionPhase::PollWindow,
                round_no: 1,
                ..
            })
        ));

        let result = handle_message(ClientMessage::HostStart, &mut host, &state).await;
        assert!(matches!(
            result,
            Some(ServerMessage::Error { ref code, .. }) if code == "WRONG_PHASE"
        ));

        let result = handle_message(ClientMessage::HostStop, &mut host, &state).await;
        assert!(matches!(
            result,
            Some(ServerMessage::Phase {
                phase: SessionPhase::GameOver,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_host_kick() {
        let state = state();
        let (mut host, _host_rx) = connection(Role::Host);
        let (mut player, mut player_rx) = connection(Role::Participant);
        handle_message(
            ClientMessage::Join {
                identity: Some("mallory".to_string()),
            },
            &mut player,
            &state,
        )
        .await;

        let result = handle_message(
            ClientMessage::HostKick {
                identity: "mallory".to_string(),
            },
            &mut host,
            &state,
        )
        .await;
        assert_eq!(
            result,
            Some(ServerMessage::Roster {
                participants: vec![]
            })
        );
        assert!(matches!(
            player_rx.recv().await,
            Some(ServerMessage::Kicked { .. })
        ));

        let result = handle_message(
            ClientMessage::HostKick {
                identity: "mallory".to_string(),
            },
            &mut host,
            &state,
        )
        .await;
        assert!(matches!(
            result,
            Some(ServerMessage::Error { ref code, .. }) if code == "UNKNOWN_PARTICIPANT"
        ));
    }

    #[tokio::test]
    async fn test_answer_out_of_turn_is_ignored() {
        let state = state();
        let (mut conn, _rx) = connection(Role::Participant);
        handle_message(
            ClientMessage::Join {
                identity: Some("bob".to_string()),
            },
            &mut conn,
            &state,
        )
        .await;

        let result = handle_message(
            ClientMessage::Answer {
                option: AnswerChoice::Index(1),
            },
            &mut conn,
            &state,
        )
        .await;
        assert!(result.is_none());
        assert_eq!(state.ledger.score("bob").await, 0);
    }
}
