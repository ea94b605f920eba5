mod arbiter;
mod registry;
mod round;
mod score;

pub use arbiter::{BuzzArbiter, IngestOutcome, RaceSignal, Resolution};
pub use registry::{ParticipantHandle, Registration, Registry, RosterSnapshot};
pub use score::ScoreLedger;

use crate::broadcast::PhaseTimer;
use crate::error::SessionResult;
use crate::protocol::ServerMessage;
use crate::questions::QuestionSource;
use crate::types::*;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};

/// Everything one quiz session needs, handed to every component that runs it
pub struct SessionState {
    pub config: SessionConfig,
    pub registry: Registry,
    pub ledger: ScoreLedger,
    pub arbiter: BuzzArbiter,
    pub timer: PhaseTimer,
    pub session: RwLock<Session>,
    questions: Mutex<Box<dyn QuestionSource>>,
    buzz_port: AtomicU16,
    /// Broadcast channel for sending messages to host clients
    pub host_broadcast: broadcast::Sender<ServerMessage>,
    shutdown: watch::Sender<bool>,
}

impl SessionState {
    pub fn new(config: SessionConfig, questions: impl QuestionSource + 'static) -> Self {
        let (host_tx, _rx) = broadcast::channel(100);
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            registry: Registry::new(config.duplicate_policy),
            ledger: ScoreLedger::new(config.scoring),
            arbiter: BuzzArbiter::new(),
            timer: PhaseTimer::new(),
            session: RwLock::new(Session {
                id: ulid::Ulid::new().to_string(),
                version: 1,
                phase: SessionPhase::Idle,
                round_no: 0,
                current_round: None,
            }),
            questions: Mutex::new(Box::new(questions)),
            buzz_port: AtomicU16::new(0),
            host_broadcast: host_tx,
            shutdown: shutdown_tx,
            config,
        }
    }

    pub fn set_buzz_port(&self, port: u16) {
        self.buzz_port.store(port, Ordering::Relaxed);
    }

    pub fn buzz_port(&self) -> u16 {
        self.buzz_port.load(Ordering::Relaxed)
    }

    pub async fn get_session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session.read().await.phase
    }

    pub async fn current_round(&self) -> Option<Round> {
        self.session.read().await.current_round.clone()
    }

    pub async fn questions_remaining(&self) -> usize {
        self.questions.lock().await.remaining()
    }

    /// Send a message to all host connections
    pub fn broadcast_to_host(&self, msg: ServerMessage) {
        // Ignore send errors (no host connected is fine)
        let _ = self.host_broadcast.send(msg);
    }

    pub fn subscribe_host(&self) -> broadcast::Receiver<ServerMessage> {
        self.host_broadcast.subscribe()
    }

    /// Flips to `true` once the session is over
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn broadcast_roster(&self) {
        let participants = self.registry.snapshot().await.ids();
        self.broadcast_to_host(ServerMessage::Roster { participants });
    }

    /// Register a participant connection
    pub async fn join(
        &self,
        requested: Option<&str>,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> SessionResult<ParticipantHandle> {
        let registration = self.registry.register(requested, tx).await?;
        if let Some(old) = registration.replaced {
            old.send(ServerMessage::Kicked {
                reason: "Replaced by a new connection".to_string(),
            });
        }
        self.broadcast_roster().await;
        Ok(registration.handle)
    }

    /// Drop a participant connection that went away
    pub async fn leave(&self, handle: &ParticipantHandle) {
        if self
            .registry
            .unregister_connection(&handle.id, &handle.conn_id)
            .await
        {
            self.broadcast_roster().await;
        }
    }

    /// Forced disconnect from the operator. The in-flight round carries on.
    pub async fn kick(&self, id: &str) -> SessionResult<()> {
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| crate::error::SessionError::UnknownParticipant(id.to_string()))?;

        tracing::info!("Kicking participant {}", id);
        handle.send(ServerMessage::Kicked {
            reason: "Removed by host".to_string(),
        });
        self.registry.unregister(id).await;
        self.broadcast_roster().await;
        Ok(())
    }
}
