//! Round state machine
//!
//! Every transition happens while holding the session write lock, so timer
//! expiry, answers and operator commands are applied one at a time.

use super::{IngestOutcome, SessionState};
use crate::broadcast::{spawn_phase_countdown, TimerTicket};
use crate::error::{SessionError, SessionResult};
use crate::protocol::{QuestionInfo, ServerMessage};
use crate::state::RosterSnapshot;
use crate::types::*;
use std::sync::Arc;

impl SessionState {
    /// Check if a phase transition is valid
    fn is_valid_phase_transition(from: &SessionPhase, to: &SessionPhase) -> bool {
        use SessionPhase::*;

        match (from, to) {
            (GameOver, _) => false,

            // Normal forward flow
            (Idle, AwaitStart) => true,
            (AwaitStart, Broadcast) => true,
            (Broadcast, PollWindow) => true,
            (PollWindow, AnswerWindow) => true,
            (AnswerWindow, ScoreReport) => true,
            (ScoreReport, Advance) => true,
            (Advance, Broadcast) => true,

            // Queue exhausted or operator stop
            (_, GameOver) => true,

            _ => false,
        }
    }

    /// Get valid transitions from a phase (for host UI)
    pub fn get_valid_transitions(from: &SessionPhase) -> Vec<SessionPhase> {
        use SessionPhase::*;
        [
            Idle,
            AwaitStart,
            Broadcast,
            PollWindow,
            AnswerWindow,
            ScoreReport,
            Advance,
            GameOver,
        ]
        .into_iter()
        .filter(|to| Self::is_valid_phase_transition(from, to))
        .collect()
    }

    fn transition(&self, session: &mut Session, to: SessionPhase) -> SessionResult<()> {
        if !Self::is_valid_phase_transition(&session.phase, &to) {
            return Err(SessionError::InvalidTransition {
                from: session.phase,
                to,
            });
        }

        tracing::info!(
            "Session {} round {}: {:?} -> {:?}",
            session.id,
            session.round_no,
            session.phase,
            to
        );
        session.phase = to;
        session.version += 1;

        self.broadcast_to_host(ServerMessage::Phase {
            phase: to,
            round_no: session.round_no,
            deadline: session
                .current_round
                .as_ref()
                .and_then(|r| r.phase_deadline.clone()),
            server_now: chrono::Utc::now().to_rfc3339(),
        });
        Ok(())
    }

    fn deadline_in(seconds: u32) -> String {
        (chrono::Utc::now() + chrono::Duration::seconds(i64::from(seconds))).to_rfc3339()
    }

    fn start_countdown(
        self: &Arc<Self>,
        round_no: u32,
        phase: SessionPhase,
        roster: RosterSnapshot,
        seconds: u32,
    ) {
        let ticket = self.timer.arm(round_no, phase);
        spawn_phase_countdown(self.clone(), ticket, roster, seconds);
    }

    /// Open the session for joins
    pub async fn open_lobby(&self) -> SessionResult<()> {
        let mut session = self.session.write().await;
        self.transition(&mut session, SessionPhase::AwaitStart)
    }

    /// Operator trigger: announce the session and broadcast the first question
    pub async fn start_session(self: &Arc<Self>) -> SessionResult<()> {
        let mut session = self.session.write().await;
        if session.phase != SessionPhase::AwaitStart {
            return Err(SessionError::WrongPhase {
                expected: SessionPhase::AwaitStart,
                actual: session.phase,
            });
        }

        tracing::info!(
            "Starting session {} with {} participants",
            session.id,
            self.registry.len().await
        );
        self.registry.broadcast(&ServerMessage::SessionStarted).await;
        self.advance(&mut session).await
    }

    /// Operator stop (or process shutdown). Stopping twice is a no-op.
    pub async fn stop_session(&self, reason: &str) -> SessionResult<()> {
        let mut session = self.session.write().await;
        if session.phase == SessionPhase::GameOver {
            return Ok(());
        }
        tracing::info!("Stopping session {}: {}", session.id, reason);
        self.finish_session(&mut session).await
    }

    /// Pop the next question, or end the session when the queue is empty
    async fn advance(self: &Arc<Self>, session: &mut Session) -> SessionResult<()> {
        let next = self.questions.lock().await.next();
        match next {
            Some(question) => self.begin_round(session, question).await,
            None => {
                tracing::info!("Question queue exhausted");
                self.finish_session(session).await
            }
        }
    }

    async fn begin_round(
        self: &Arc<Self>,
        session: &mut Session,
        question: Question,
    ) -> SessionResult<()> {
        let roster = self.registry.snapshot().await;
        session.round_no += 1;
        let round_no = session.round_no;

        self.ledger.enroll(roster.ids()).await;
        session.current_round = Some(Round {
            id: ulid::Ulid::new().to_string(),
            number: round_no,
            question,
            phase_deadline: None,
            accepted_participant: None,
            flags: roster
                .ids()
                .into_iter()
                .map(|id| (id, RoundFlags::default()))
                .collect(),
            scored: false,
            roster: roster.clone(),
        });
        self.transition(session, SessionPhase::Broadcast)?;

        // The window opens before the question goes out so that the fastest
        // buzz is never dropped.
        self.arbiter.open_window(round_no, roster.ids()).await;

        let deadline = Self::deadline_in(self.config.poll_seconds);
        let round = session
            .current_round
            .as_mut()
            .ok_or(SessionError::NoActiveRound)?;
        round.phase_deadline = Some(deadline.clone());
        let msg = ServerMessage::Question {
            round_no,
            question: QuestionInfo::from(&round.question),
            deadline: Some(deadline),
        };
        tracing::info!(
            "Round {}: sending question to {} participants",
            round_no,
            roster.len()
        );
        self.registry.send_to_roster(&roster, &msg).await;

        self.transition(session, SessionPhase::PollWindow)?;
        self.start_countdown(
            round_no,
            SessionPhase::PollWindow,
            roster,
            self.config.poll_seconds,
        );
        Ok(())
    }

    /// Resolve the buzz race and open the answer window
    async fn close_poll_window(self: &Arc<Self>, session: &mut Session) -> SessionResult<()> {
        let round_no = session.round_no;
        let resolution = match self.arbiter.resolve(round_no).await {
            Some(r) => r,
            None => {
                tracing::warn!("Round {} already resolved", round_no);
                return Ok(());
            }
        };

        let round = session
            .current_round
            .as_mut()
            .ok_or(SessionError::NoActiveRound)?;

        if let Some(winner) = &resolution.accepted {
            round.accepted_participant = Some(winner.clone());
            if let Some(flags) = round.flags_mut(winner) {
                flags.received_accept = true;
            }
            if let Some(handle) = round.roster.get(winner) {
                self.registry
                    .deliver(handle, ServerMessage::Accept { round_no })
                    .await;
            }
        }
        for loser in &resolution.rejected {
            if let Some(handle) = round.roster.get(loser) {
                self.registry
                    .deliver(handle, ServerMessage::Reject { round_no })
                    .await;
            }
        }

        tracing::info!(
            "Round {}: race won by {:?}, {} rejected",
            round_no,
            resolution.accepted,
            resolution.rejected.len()
        );
        self.broadcast_to_host(ServerMessage::RaceResolved {
            round_no,
            accepted: resolution.accepted,
            rejected: resolution.rejected,
        });

        round.phase_deadline = Some(Self::deadline_in(self.config.answer_seconds));
        let roster = round.roster.clone();
        self.transition(session, SessionPhase::AnswerWindow)?;
        self.start_countdown(
            round_no,
            SessionPhase::AnswerWindow,
            roster,
            self.config.answer_seconds,
        );
        Ok(())
    }

    /// Evaluate an answer. Only the accepted participant's first valid
    /// answer counts; it ends the round without waiting for the timer.
    pub async fn submit_answer(
        self: &Arc<Self>,
        id: &str,
        choice: AnswerChoice,
    ) -> SessionResult<bool> {
        let mut session = self.session.write().await;
        if session.phase != SessionPhase::AnswerWindow {
            return Err(SessionError::WrongPhase {
                expected: SessionPhase::AnswerWindow,
                actual: session.phase,
            });
        }

        let round_no = session.round_no;
        let round = session
            .current_round
            .as_mut()
            .ok_or(SessionError::NoActiveRound)?;

        if round.accepted_participant.as_deref() != Some(id) {
            return Err(SessionError::NotAccepted(id.to_string()));
        }
        if round.question.option_index(&choice).is_none() {
            return Err(SessionError::InvalidOption(format!("{:?}", choice)));
        }
        let flags = round
            .flags_mut(id)
            .ok_or_else(|| SessionError::UnknownParticipant(id.to_string()))?;
        if flags.has_answered {
            return Err(SessionError::AlreadyAnswered(id.to_string()));
        }
        flags.has_answered = true;

        let correct = round.question.is_correct(&choice);
        let event = if correct {
            ScoreEvent::Correct
        } else {
            ScoreEvent::Incorrect
        };
        let score = match self.ledger.apply(round_no, id, event).await {
            Some(total) => total,
            None => self.ledger.score(id).await,
        };
        round.scored = true;

        let msg = if correct {
            ServerMessage::Correct { score }
        } else {
            ServerMessage::Incorrect {
                score,
                correct_option: round
                    .question
                    .correct_option()
                    .unwrap_or_default()
                    .to_string(),
            }
        };
        if let Some(handle) = round.roster.get(id) {
            self.registry.deliver(handle, msg).await;
        }

        self.timer.cancel();
        self.finish_round(&mut session).await?;
        Ok(correct)
    }

    /// Answer window lapsed without an answer
    async fn close_answer_window(self: &Arc<Self>, session: &mut Session) -> SessionResult<()> {
        let round_no = session.round_no;
        let round = session
            .current_round
            .as_mut()
            .ok_or(SessionError::NoActiveRound)?;

        if !round.scored {
            match round.accepted_participant.clone() {
                Some(winner) => {
                    tracing::info!("Round {}: {} ran out of time", round_no, winner);
                    let score = self
                        .ledger
                        .apply(round_no, &winner, ScoreEvent::TimeoutAfterAccept)
                        .await
                        .unwrap_or_default();
                    if let Some(handle) = round.roster.get(&winner) {
                        self.registry
                            .deliver(handle, ServerMessage::Timeout { score })
                            .await;
                    }
                }
                None => {
                    tracing::info!("Round {}: nobody buzzed in", round_no);
                    for handle in round.roster.handles() {
                        let score = self
                            .ledger
                            .apply(round_no, &handle.id, ScoreEvent::TimeoutNoAccept)
                            .await
                            .unwrap_or_default();
                        if let Some(live) = self.registry.live_handle(handle).await {
                            self.registry
                                .deliver(&live, ServerMessage::Timeout { score })
                                .await;
                        }
                    }
                }
            }
            round.scored = true;
        }

        self.finish_round(session).await
    }

    /// Report scores, then move on
    async fn finish_round(self: &Arc<Self>, session: &mut Session) -> SessionResult<()> {
        self.transition(session, SessionPhase::ScoreReport)?;
        let scores = self.ledger.snapshot().await;
        tracing::info!("Scores after round {}: {:?}", session.round_no, scores);
        self.broadcast_to_host(ServerMessage::Scores { scores });

        self.transition(session, SessionPhase::Advance)?;
        self.advance(session).await
    }

    async fn finish_session(&self, session: &mut Session) -> SessionResult<()> {
        self.timer.cancel();
        self.arbiter.close().await;
        self.transition(session, SessionPhase::GameOver)?;
        session.current_round = None;

        let final_scores = self.ledger.snapshot().await;
        tracing::info!("Session {} over: {:?}", session.id, final_scores);
        let msg = ServerMessage::SessionOver { final_scores };
        self.registry.broadcast(&msg).await;
        self.broadcast_to_host(msg);
        self.signal_shutdown();
        Ok(())
    }

    /// Timer expiry for the current phase. Stale tickets are ignored.
    pub async fn on_phase_expired(self: &Arc<Self>, ticket: TimerTicket) {
        let mut session = self.session.write().await;
        if !self.timer.is_current(&ticket)
            || session.round_no != ticket.round_no
            || session.phase != ticket.phase
        {
            tracing::debug!("Ignoring stale expiry for {:?}", ticket);
            return;
        }

        let result = match ticket.phase {
            SessionPhase::PollWindow => self.close_poll_window(&mut session).await,
            SessionPhase::AnswerWindow => self.close_answer_window(&mut session).await,
            other => {
                tracing::warn!("Timer expired in untimed phase {:?}", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::error!("Phase expiry failed in round {}: {}", ticket.round_no, e);
        }
    }

    /// Feed a race signal to the arbiter
    pub async fn handle_buzz(&self, id: &str) -> IngestOutcome {
        let outcome = self.arbiter.ingest(id).await;
        match &outcome {
            IngestOutcome::Queued {
                round_no,
                arrival_order,
            } => {
                tracing::debug!(
                    "Round {}: buzz #{} from {}",
                    round_no,
                    arrival_order,
                    id
                );
            }
            IngestOutcome::Duplicate => {
                tracing::debug!("Duplicate buzz from {}", id);
            }
            IngestOutcome::UnknownParticipant => {
                tracing::warn!("Discarding buzz from {} (not in this round)", id);
            }
            IngestOutcome::NoWindow => {
                tracing::warn!("Discarding buzz from {} outside a poll window", id);
            }
            IngestOutcome::Late { round_no } => {
                tracing::debug!("Late buzz from {} in round {}", id, round_no);
                self.registry
                    .send(id, ServerMessage::Reject { round_no: *round_no })
                    .await;
            }
        }
        outcome
    }
}
