//! Client registry
//!
//! Directory of connected participants keyed by identity. Each entry owns an
//! unbounded outbound channel drained by the participant's connection task,
//! so pushing a message never waits on network I/O.

use crate::error::{SessionError, SessionResult};
use crate::protocol::ServerMessage;
use crate::types::{ConnectionId, DuplicatePolicy, ParticipantId};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Safe character set for short codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 5;
const MAX_IDENTITY_CHARS: usize = 32;

/// Generate a coordinator-assigned identity like `P-7KQ2M`
fn generate_identity() -> String {
    let mut rng = rand::rng();
    let code: String = (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect();
    format!("P-{}", code)
}

fn validate_identity(raw: &str) -> SessionResult<ParticipantId> {
    let identity = raw.trim();
    if identity.is_empty()
        || identity.chars().count() > MAX_IDENTITY_CHARS
        || identity.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(SessionError::InvalidIdentity(raw.to_string()));
    }
    Ok(identity.to_string())
}

/// Send-capable handle for one participant connection
#[derive(Debug, Clone)]
pub struct ParticipantHandle {
    pub id: ParticipantId,
    /// Distinguishes reconnects that reuse an identity
    pub conn_id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ParticipantHandle {
    pub fn new(id: ParticipantId, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            conn_id: ulid::Ulid::new().to_string(),
            tx,
        }
    }

    /// Queue a message; fails once the connection task has gone away
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Immutable copy of the registry taken at round start
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    participants: Arc<BTreeMap<ParticipantId, ParticipantHandle>>,
}

impl RosterSnapshot {
    pub fn get(&self, id: &str) -> Option<&ParticipantHandle> {
        self.participants.get(id)
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.participants.keys().cloned().collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &ParticipantHandle> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Outcome of a registration
#[derive(Debug)]
pub struct Registration {
    pub handle: ParticipantHandle,
    /// Connection that lost its identity under [`DuplicatePolicy::Replace`]
    pub replaced: Option<ParticipantHandle>,
}

pub struct Registry {
    participants: RwLock<HashMap<ParticipantId, ParticipantHandle>>,
    policy: DuplicatePolicy,
}

impl Registry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            participants: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Register a connection under the requested (or a generated) identity
    pub async fn register(
        &self,
        requested: Option<&str>,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> SessionResult<Registration> {
        let mut participants = self.participants.write().await;

        let identity = match requested {
            Some(raw) => validate_identity(raw)?,
            None => loop {
                let code = generate_identity();
                if !participants.contains_key(&code) {
                    break code;
                }
            },
        };

        let identity = if participants.contains_key(&identity) {
            match self.policy {
                DuplicatePolicy::Reject => {
                    tracing::warn!("Rejecting duplicate identity {}", identity);
                    return Err(SessionError::DuplicateIdentity(identity));
                }
                DuplicatePolicy::Disambiguate => {
                    let mut n = 2;
                    loop {
                        let suffix = format!("-{}", n);
                        let keep = MAX_IDENTITY_CHARS.saturating_sub(suffix.chars().count());
                        let base: String = identity.chars().take(keep).collect();
                        let candidate = format!("{}{}", base, suffix);
                        if !participants.contains_key(&candidate) {
                            tracing::info!("Identity {} taken, using {}", identity, candidate);
                            break candidate;
                        }
                        n += 1;
                    }
                }
                DuplicatePolicy::Replace => identity,
            }
        } else {
            identity
        };

        let handle = ParticipantHandle::new(identity.clone(), tx);
        let replaced = participants.insert(identity.clone(), handle.clone());
        if replaced.is_some() {
            tracing::warn!("Identity {} re-registered, replacing old connection", identity);
        }
        tracing::info!(
            "Registered participant {} ({} connected)",
            identity,
            participants.len()
        );

        Ok(Registration { handle, replaced })
    }

    /// Remove an identity. Safe to call repeatedly.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.participants.write().await.remove(id).is_some();
        if removed {
            tracing::info!("Unregistered participant {}", id);
        }
        removed
    }

    /// Remove an identity only if it still belongs to the given connection
    pub async fn unregister_connection(&self, id: &str, conn_id: &str) -> bool {
        let mut participants = self.participants.write().await;
        match participants.get(id) {
            Some(handle) if handle.conn_id == conn_id => {
                participants.remove(id);
                tracing::info!("Unregistered participant {}", id);
                true
            }
            _ => false,
        }
    }

    pub async fn snapshot(&self) -> RosterSnapshot {
        let participants = self.participants.read().await;
        RosterSnapshot {
            participants: Arc::new(
                participants
                    .iter()
                    .map(|(id, h)| (id.clone(), h.clone()))
                    .collect(),
            ),
        }
    }

    pub async fn get(&self, id: &str) -> Option<ParticipantHandle> {
        self.participants.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.participants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.participants.read().await.is_empty()
    }

    /// Best-effort send to a registered participant. A failed send is
    /// treated as a disconnect.
    pub async fn send(&self, id: &str, msg: ServerMessage) -> bool {
        let handle = match self.get(id).await {
            Some(h) => h,
            None => {
                tracing::warn!("Dropping message for unknown participant {}", id);
                return false;
            }
        };
        self.deliver(&handle, msg).await
    }

    /// The connection a snapshot entry should reach: the entry itself while
    /// open, otherwise a newer connection registered under the same identity
    pub async fn live_handle(&self, handle: &ParticipantHandle) -> Option<ParticipantHandle> {
        if !handle.is_closed() {
            return Some(handle.clone());
        }
        self.get(&handle.id)
            .await
            .filter(|current| current.conn_id != handle.conn_id && !current.is_closed())
    }

    /// Send through a handle (usually from a round snapshot)
    pub async fn deliver(&self, handle: &ParticipantHandle, msg: ServerMessage) -> bool {
        let target = match self.live_handle(handle).await {
            Some(live) => live,
            None => handle.clone(),
        };
        if target.send(msg) {
            return true;
        }
        tracing::warn!("Send to {} failed, treating as disconnect", target.id);
        self.unregister_connection(&target.id, &target.conn_id).await;
        false
    }

    /// Send to everyone in a snapshot, skipping connections that already closed
    pub async fn send_to_roster(&self, roster: &RosterSnapshot, msg: &ServerMessage) {
        for handle in roster.handles() {
            match self.live_handle(handle).await {
                Some(live) => {
                    self.deliver(&live, msg.clone()).await;
                }
                None => tracing::debug!("Skipping closed connection for {}", handle.id),
            }
        }
    }

    /// Send to everyone currently registered
    pub async fn broadcast(&self, msg: &ServerMessage) {
        let roster = self.snapshot().await;
        self.send_to_roster(&roster, msg).await;
    }
}
