//! UDP race-signal listener
//!
//! Datagrams are `buzz:<identity>`. Arrival order at this socket is the
//! order the arbiter sees; nothing is ever sent back on this channel.

use crate::error::SignalError;
use crate::state::SessionState;
use crate::types::ParticipantId;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const SIGNAL_TAG: &str = "buzz:";

/// Parse one datagram into the identity it names
pub fn parse_race_signal(datagram: &[u8]) -> Result<ParticipantId, SignalError> {
    let text = std::str::from_utf8(datagram).map_err(|_| SignalError::NotUtf8)?;
    let identity = text
        .strip_prefix(SIGNAL_TAG)
        .ok_or(SignalError::MissingTag)?
        .trim();
    if identity.is_empty() {
        return Err(SignalError::EmptyIdentity);
    }
    Ok(identity.to_string())
}

/// Spawn the receive loop. It runs until the session signals shutdown.
pub fn spawn_buzz_listener(socket: UdpSocket, state: Arc<SessionState>) -> JoinHandle<()> {
    let mut shutdown = state.subscribe_shutdown();

    tokio::spawn(async move {
        let mut buffer = [0u8; 512];
        if let Ok(addr) = socket.local_addr() {
            tracing::info!("Listening for buzz signals on udp://{}", addr);
        }

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Buzz listener stopping");
                        break;
                    }
                }
                received = socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, addr)) => match parse_race_signal(&buffer[..len]) {
                            Ok(identity) => {
                                tracing::debug!("Buzz from {} ({})", identity, addr);
                                state.handle_buzz(&identity).await;
                            }
                            Err(e) => {
                                tracing::warn!("Dropping datagram from {}: {}", addr, e);
                            }
                        },
                        Err(e) => {
                            tracing::error!("Error receiving buzz datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        }
    })
}
