use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake; a missing identity gets a coordinator-assigned code
    Join {
        #[serde(default)]
        identity: Option<String>,
    },
    /// Race signal over the reliable channel, for clients that cannot send UDP
    Buzz,
    Answer {
        option: AnswerChoice,
    },
    // Host-only messages
    HostStart,
    HostStop,
    HostKick {
        identity: ParticipantId,
    },
    HostGetScores,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        role: Role,
        session_id: SessionId,
        phase: SessionPhase,
        server_now: String,
    },
    Joined {
        identity: ParticipantId,
        /// UDP port for `buzz:<identity>` datagrams
        buzz_port: u16,
        phase: SessionPhase,
    },
    SessionStarted,
    Question {
        round_no: u32,
        question: QuestionInfo,
        deadline: Option<String>,
    },
    /// Best-effort countdown hint, once per second
    Timer {
        phase: SessionPhase,
        seconds: u32,
    },
    Accept {
        round_no: u32,
    },
    Reject {
        round_no: u32,
    },
    Correct {
        score: i64,
    },
    Incorrect {
        score: i64,
        correct_option: String,
    },
    Timeout {
        score: i64,
    },
    SessionOver {
        final_scores: Vec<ScoreEntry>,
    },
    Kicked {
        reason: String,
    },
    // Host-only messages
    Phase {
        phase: SessionPhase,
        round_no: u32,
        deadline: Option<String>,
        server_now: String,
    },
    Roster {
        participants: Vec<ParticipantId>,
    },
    Scores {
        scores: Vec<ScoreEntry>,
    },
    RaceResolved {
        round_no: u32,
        accepted: Option<ParticipantId>,
        rejected: Vec<ParticipantId>,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }
}

impl From<crate::error::SessionError> for ServerMessage {
    fn from(e: crate::error::SessionError) -> Self {
        ServerMessage::error(e.code(), e.to_string())
    }
}

/// Public question info (no correct answer to prevent spoilers)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionInfo {
    pub prompt: String,
    pub options: Vec<String>,
}

impl From<&Question> for QuestionInfo {
    fn from(q: &Question) -> Self {
        Self {
            prompt: q.prompt.clone(),
            options: q.options.to_vec(),
        }
    }
}
