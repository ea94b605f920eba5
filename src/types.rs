use crate::state::RosterSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type SessionId = String;
pub type RoundId = String;
pub type ParticipantId = String;
pub type ConnectionId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Idle,
    AwaitStart,
    Broadcast,
    PollWindow,
    AnswerWindow,
    ScoreReport,
    Advance,
    GameOver,
}

/// Score deltas for the four ledger events.
///
/// Revisions of the game disagreed on how harsh a timeout should be, so
/// every delta is configurable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub correct: i64,
    pub incorrect: i64,
    /// Applied to every roster member when nobody won the race
    pub timeout_no_accept: i64,
    /// Applied to the accepted participant when the answer window lapses
    pub timeout_after_accept: i64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            correct: 10,
            incorrect: -10,
            timeout_no_accept: 0,
            timeout_after_accept: -10,
        }
    }
}

/// What to do when a JOIN carries an identity that is already connected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Refuse the second connection
    #[default]
    Reject,
    /// Register the newcomer as `name-2`, `name-3`, ...
    Disambiguate,
    /// Last write wins; the old connection is told it was replaced
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub poll_seconds: u32,
    pub answer_seconds: u32,
    pub scoring: ScoringPolicy,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_seconds: 10,
            answer_seconds: 10,
            scoring: ScoringPolicy::default(),
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

/// An immutable quiz question with exactly four options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub prompt: String,
    pub options: [String; 4],
    pub correct_index: usize,
}

impl Question {
    pub fn correct_option(&self) -> Option<&str> {
        self.options.get(self.correct_index).map(String::as_str)
    }

    /// Resolve a participant's choice to an option index
    pub fn option_index(&self, choice: &AnswerChoice) -> Option<usize> {
        match choice {
            AnswerChoice::Index(i) if *i < self.options.len() => Some(*i),
            AnswerChoice::Index(_) => None,
            AnswerChoice::Text(text) => self.options.iter().position(|o| o == text.trim()),
        }
    }

    pub fn is_correct(&self, choice: &AnswerChoice) -> bool {
        self.option_index(choice) == Some(self.correct_index)
    }
}

/// A participant's selection, either by position or by option text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AnswerChoice {
    Index(usize),
    Text(String),
}

/// Per-round flags kept for every participant in the round snapshot
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundFlags {
    pub has_answered: bool,
    pub received_accept: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub number: u32,
    pub question: Question,
    pub phase_deadline: Option<String>, // ISO timestamp of the running countdown
    pub accepted_participant: Option<ParticipantId>,
    pub flags: HashMap<ParticipantId, RoundFlags>,
    pub scored: bool,
    /// Participants taken at round start; late joiners wait for the next round
    #[serde(skip)]
    pub roster: RosterSnapshot,
}

impl Round {
    pub fn flags_mut(&mut self, id: &str) -> Option<&mut RoundFlags> {
        self.flags.get_mut(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub version: u64,
    pub phase: SessionPhase,
    pub round_no: u32,
    pub current_round: Option<Round>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreEntry {
    pub identity: ParticipantId,
    pub score: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Participant,
}

/// Ledger update events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreEvent {
    Correct,
    Incorrect,
    TimeoutNoAccept,
    TimeoutAfterAccept,
}

impl ScoreEvent {
    pub fn delta(&self, policy: &ScoringPolicy) -> i64 {
        match self {
            ScoreEvent::Correct => policy.correct,
            ScoreEvent::Incorrect => policy.incorrect,
            ScoreEvent::TimeoutNoAccept => policy.timeout_no_accept,
            ScoreEvent::TimeoutAfterAccept => policy.timeout_after_accept,
        }
    }
}
