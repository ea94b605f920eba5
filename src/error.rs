use crate::types::{ParticipantId, SessionPhase};
use std::path::PathBuf;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the coordinator while running a session.
///
/// None of these are fatal: transport code logs them and, where a client
/// asked for something, reports them back as `ServerMessage::Error`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid identity {0:?}")]
    InvalidIdentity(String),

    #[error("Identity {0} is already connected")]
    DuplicateIdentity(ParticipantId),

    #[error("Invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionPhase,
        to: SessionPhase,
    },

    #[error("Expected phase {expected:?} but session is in {actual:?}")]
    WrongPhase {
        expected: SessionPhase,
        actual: SessionPhase,
    },

    #[error("Participant {0} does not hold the answer right this round")]
    NotAccepted(ParticipantId),

    #[error("Participant {0} already answered this round")]
    AlreadyAnswered(ParticipantId),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("No active round")]
    NoActiveRound,

    #[error("Unknown participant {0}")]
    UnknownParticipant(ParticipantId),
}

impl SessionError {
    /// Stable code sent to clients alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::InvalidIdentity(_) => "INVALID_IDENTITY",
            SessionError::DuplicateIdentity(_) => "DUPLICATE_IDENTITY",
            SessionError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SessionError::WrongPhase { .. } => "WRONG_PHASE",
            SessionError::NotAccepted(_) => "NOT_ACCEPTED",
            SessionError::AlreadyAnswered(_) => "ALREADY_ANSWERED",
            SessionError::InvalidOption(_) => "INVALID_OPTION",
            SessionError::NoActiveRound => "NO_ACTIVE_ROUND",
            SessionError::UnknownParticipant(_) => "UNKNOWN_PARTICIPANT",
        }
    }
}

/// Startup errors. Any of these stops the process before sockets are bound.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {name}")]
    InvalidVar { name: &'static str, value: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No usable questions in {0}")]
    NoQuestions(PathBuf),
}

/// Malformed race-signal datagrams. Logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("Datagram is not valid UTF-8")]
    NotUtf8,

    #[error("Datagram does not start with \"buzz:\"")]
    MissingTag,

    #[error("Datagram carries no identity")]
    EmptyIdentity,
}
