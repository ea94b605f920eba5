//! Buzz-race arbitration
//!
//! Race signals are appended in the order the coordinator receives them.
//! Resolution happens once, when the poll window closes: the head of the
//! queue wins and everyone else who buzzed is rejected. The whole window sits
//! behind one mutex, so ingest and resolve are linearizable with respect to
//! each other and no accept can be granted after resolution.

use crate::types::ParticipantId;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// One buzz attempt as received by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceSignal {
    pub participant: ParticipantId,
    pub arrival_order: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub round_no: u32,
    pub accepted: Option<ParticipantId>,
    /// Everyone else who buzzed, in arrival order
    pub rejected: Vec<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued { round_no: u32, arrival_order: u64 },
    /// Same participant already buzzed this window
    Duplicate,
    /// Not in the roster snapshot for this round
    UnknownParticipant,
    /// No window is open
    NoWindow,
    /// The window already resolved; the sender must be rejected
    Late { round_no: u32 },
}

#[derive(Debug)]
struct BuzzWindow {
    round_no: u32,
    roster: HashSet<ParticipantId>,
    queue: Vec<RaceSignal>,
    seen: HashSet<ParticipantId>,
    next_order: u64,
    resolution: Option<Resolution>,
}

#[derive(Debug, Default)]
pub struct BuzzArbiter {
    window: Mutex<Option<BuzzWindow>>,
}

impl BuzzArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting signals for a round. Replaces any previous window.
    pub async fn open_window(&self, round_no: u32, roster: impl IntoIterator<Item = ParticipantId>) {
        let window = BuzzWindow {
            round_no,
            roster: roster.into_iter().collect(),
            queue: Vec::new(),
            seen: HashSet::new(),
            next_order: 0,
            resolution: None,
        };
        tracing::debug!(
            "Opened buzz window for round {} ({} eligible)",
            round_no,
            window.roster.len()
        );
        *self.window.lock().await = Some(window);
    }

    /// Stop accepting signals entirely (session over)
    pub async fn close(&self) {
        *self.window.lock().await = None;
    }

    pub async fn ingest(&self, participant: &str) -> IngestOutcome {
        let mut guard = self.window.lock().await;
        let window = match guard.as_mut() {
            Some(w) => w,
            None => return IngestOutcome::NoWindow,
        };

        if !window.roster.contains(participant) {
            return IngestOutcome::UnknownParticipant;
        }

        if let Some(resolution) = &window.resolution {
            if resolution.accepted.as_deref() == Some(participant) {
                return IngestOutcome::Duplicate;
            }
            return IngestOutcome::Late {
                round_no: window.round_no,
            };
        }

        if !window.seen.insert(participant.to_string()) {
            return IngestOutcome::Duplicate;
        }

        let arrival_order = window.next_order;
        window.next_order += 1;
        window.queue.push(RaceSignal {
            participant: participant.to_string(),
            arrival_order,
        });

        IngestOutcome::Queued {
            round_no: window.round_no,
            arrival_order,
        }
    }

    /// Resolve the race for `round_no`. Returns `None` when there is no
    /// matching window or it was already resolved, so callers notify
    /// participants at most once.
    pub async fn resolve(&self, round_no: u32) -> Option<Resolution> {
        let mut guard = self.window.lock().await;
        let window = guard.as_mut().filter(|w| w.round_no == round_no)?;
        if window.resolution.is_some() {
            return None;
        }

        let mut queue = std::mem::take(&mut window.queue).into_iter();
        let accepted = queue.next().map(|s| s.participant);
        let rejected = queue.map(|s| s.participant).collect();

        let resolution = Resolution {
            round_no,
            accepted,
            rejected,
        };
        window.resolution = Some(resolution.clone());
        Some(resolution)
    }

    /// Resolution of the current window, if it has been resolved
    pub async fn resolution(&self) -> Option<Resolution> {
        self.window
            .lock()
            .await
            .as_ref()
            .and_then(|w| w.resolution.clone())
    }

    /// Signals queued so far in the open window
    pub async fn pending(&self) -> Vec<RaceSignal> {
        self.window
            .lock()
            .await
            .as_ref()
            .map(|w| w.queue.clone())
            .unwrap_or_default()
    }
}
