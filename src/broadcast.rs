use crate::protocol::ServerMessage;
use crate::state::{RosterSnapshot, SessionState};
use crate::types::SessionPhase;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Identifies one armed countdown. Expiry is only honoured while the ticket
/// is still the timer's current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket {
    pub generation: u64,
    pub round_no: u32,
    pub phase: SessionPhase,
}

/// The single authoritative phase timer. Arming a new countdown invalidates
/// the previous one.
#[derive(Debug, Default)]
pub struct PhaseTimer {
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate the running countdown and hand out a ticket for a new one
    pub fn arm(&self, round_no: u32, phase: SessionPhase) -> TimerTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.abort_task();
        TimerTicket {
            generation,
            round_no,
            phase,
        }
    }

    /// Keep the countdown task so a later `arm`/`cancel` can stop it
    pub fn attach(&self, ticket: &TimerTicket, task: JoinHandle<()>) {
        let mut guard = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_current(ticket) {
            *guard = Some(task);
        } else {
            task.abort();
        }
    }

    pub fn is_current(&self, ticket: &TimerTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }

    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.abort_task();
    }

    fn abort_task(&self) {
        let mut guard = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = guard.take() {
            task.abort();
        }
    }
}

/// Spawn a countdown that pushes the remaining seconds to the round roster
/// once per second and signals the state machine when it reaches zero.
pub fn spawn_phase_countdown(
    state: Arc<SessionState>,
    ticket: TimerTicket,
    roster: RosterSnapshot,
    seconds: u32,
) {
    let task_state = state.clone();
    let task = tokio::spawn(async move {
        let state = task_state;
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut remaining = seconds;

        loop {
            interval.tick().await;

            if !state.timer.is_current(&ticket) {
                tracing::debug!("Countdown for {:?} superseded", ticket.phase);
                return;
            }

            let tick = ServerMessage::Timer {
                phase: ticket.phase,
                seconds: remaining,
            };
            state.registry.send_to_roster(&roster, &tick).await;

            if remaining == 0 {
                // Expiry runs on its own task: it arms the next countdown,
                // which aborts this one.
                tokio::spawn(async move {
                    state.on_phase_expired(ticket).await;
                });
                return;
            }
            remaining -= 1;
        }
    });

    state.timer.attach(&ticket, task);
}
