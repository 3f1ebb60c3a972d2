//! Per-connection session executor.
//!
//! One of these runs per accepted BLE connection, as a single `tokio`
//! task. It owns the fragment reassembler and the pairing state machine,
//! and is the only place either is touched — matching the core's
//! single-executor threading discipline. The only suspension points are
//! "wait for the next transport buffer" and "wait for the phase timer",
//! expressed as one `tokio::select!` below; the state machine itself never
//! awaits anything.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use victor_core::config::PairingConfig;
use victor_core::control::PairingControl;
use victor_core::crypto::Keypair;
use victor_core::events::{EventLog, UpwardEvent};
use victor_core::fragment::{self, FeedOutcome, Reassembler};
use victor_core::keyring::{ClientRecord, Keyring};
use victor_core::pairing::{ClientStore, PairingError, PairingEvent, PairingSession, State};
use victor_core::wire::RtsMessage;

use crate::transport::Connection;

/// Reassembly buffers larger than this are abnormal — no real pairing
/// message is anywhere near this size.
const MAX_MESSAGE_LEN: usize = 4096;

/// Adapts the on-disk keyring to the pairing layer's [`ClientStore`] seam,
/// persisting to `path` on every successful upsert. Lookups never touch
/// disk — the whole keyring is held in memory for the daemon's lifetime.
pub struct KeyringStore {
    keyring: Keyring,
    path: PathBuf,
}

impl KeyringStore {
    pub fn new(keyring: Keyring, path: PathBuf) -> Self {
        Self { keyring, path }
    }

    pub fn identity(&self) -> Keypair {
        self.keyring.identity.clone()
    }

    pub fn robot_name(&mut self) -> String {
        self.keyring.ensure_name().to_string()
    }
}

impl ClientStore for KeyringStore {
    fn lookup(&self, pk_client: &[u8; 32]) -> Option<([u8; 32], [u8; 32])> {
        self.keyring
            .clients
            .iter()
            .find(|c| &c.pk_client == pk_client)
            .map(|c| (c.sk_rx, c.sk_tx))
    }

    fn upsert(&mut self, record: ClientRecord) {
        match self
            .keyring
            .clients
            .iter_mut()
            .find(|c| c.pk_client == record.pk_client)
        {
            Some(existing) => *existing = record,
            None => self.keyring.clients.push(record),
        }
        if let Err(e) = self.keyring.save(&self.path) {
            tracing::error!(error = %e, path = %self.path.display(), "failed to persist keyring");
        }
    }
}

/// Drives one BLE connection from accept to a confirmed shared secret (or
/// to the connection being dropped). `control` is re-read on every
/// message, not latched at accept time, so a client already sitting at
/// the handshake phase picks up `begin_pairing`/`stop_pairing` as soon as
/// an operator calls them.
pub async fn run_session(
    mut conn: Connection,
    identity: Keypair,
    policy: PairingConfig,
    control: PairingControl,
    store: &mut dyn ClientStore,
    events: &EventLog,
) {
    let mut session = PairingSession::new(identity, policy.clone());
    session.begin();
    publish_status(&session, &control);

    let mut reassembler = Reassembler::new(MAX_MESSAGE_LEN);
    let phase_timeout = Duration::from_secs(policy.phase_timeout_secs.max(1));
    let mut deadline = Instant::now() + phase_timeout;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(peer = %conn.peer, state = ?session.state(), "pairing phase timed out");
                match session.handle_timeout() {
                    Ok(_) => {
                        reassembler.reset();
                        events.push(UpwardEvent::StopPairing { reason: "phase timeout".into() });
                        deadline = Instant::now() + phase_timeout;
                    }
                    Err(e) => {
                        tracing::error!(peer = %conn.peer, error = %e, "pairing session dropped after timeout");
                        events.push(UpwardEvent::StopPairing { reason: e.to_string() });
                        publish_status(&session, &control);
                        return;
                    }
                }
                publish_status(&session, &control);
            }

            maybe_buf = conn.inbound.recv() => {
                let Some(buf) = maybe_buf else {
                    tracing::info!(peer = %conn.peer, "transport closed");
                    return;
                };

                let whole = match reassembler.feed(&buf) {
                    FeedOutcome::Pending => continue,
                    FeedOutcome::Complete(msg) => msg,
                    FeedOutcome::Abnormality => {
                        tracing::warn!(peer = %conn.peer, "dropped malformed fragment");
                        continue;
                    }
                };
                deadline = Instant::now() + phase_timeout;

                if session.state() == State::AwaitingHandshake {
                    match session.handle_handshake(&whole) {
                        Ok(reply) => {
                            if !send_fragmented(&conn, &reply) {
                                return;
                            }
                        }
                        Err(PairingError::UnsupportedVersion(version)) => {
                            tracing::warn!(peer = %conn.peer, version, "legacy client rejected");
                            send_fragmented(&conn, &RtsMessage::CancelPairing.encode());
                            events.push(UpwardEvent::StopPairing {
                                reason: format!("unsupported handshake version {version}"),
                            });
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(peer = %conn.peer, error = %e, "handshake rejected");
                        }
                    }
                    publish_status(&session, &control);
                    continue;
                }

                session.set_pairing_armed(control.is_armed());
                match session.handle_rts(&whole, store) {
                    Ok(PairingEvent::Reply(messages)) => {
                        // A PIN freshly generated by this ConnRequest must be
                        // shown on the robot's display before the device can
                        // possibly complete the challenge — report it now,
                        // not at completion.
                        if session.state() == State::AwaitingNonceAck {
                            if let Some(pin) = session.pin() {
                                let pin_str = String::from_utf8_lossy(&pin).to_string();
                                events.push(UpwardEvent::UpdatedPin { pin: pin_str });
                            }
                        }
                        for message in &messages {
                            if !send_fragmented(&conn, message) {
                                return;
                            }
                        }
                    }
                    Ok(PairingEvent::Restarted) => {
                        reassembler.reset();
                        events.push(UpwardEvent::StopPairing { reason: "restarted".into() });
                    }
                    Ok(PairingEvent::Completed(completed)) => {
                        send_fragmented(&conn, &completed.success_reply);
                        events.push(UpwardEvent::CompletedPairing {
                            peer_pubkey: hex::encode(completed.peer_pk),
                            reconnection: completed.conn_type
                                == victor_core::wire::ConnType::Reconnection,
                        });
                        tracing::info!(
                            peer = %conn.peer,
                            peer_pubkey = hex::encode(completed.peer_pk),
                            "pairing completed"
                        );
                        // Application traffic on the now-encrypted channel is
                        // out of scope for the pairing core; the connection
                        // task ends here with the session established.
                        publish_status(&session, &control);
                        return;
                    }
                    Err(e) => {
                        let fatal = matches!(
                            e,
                            PairingError::TooManyRestarts
                                | PairingError::TooManyAbnormalities
                                | PairingError::TooManyChallengeFailures
                        );
                        tracing::warn!(peer = %conn.peer, error = %e, fatal, "pairing error");
                        if fatal {
                            events.push(UpwardEvent::StopPairing { reason: e.to_string() });
                            publish_status(&session, &control);
                            return;
                        }
                    }
                }
                publish_status(&session, &control);
            }
        }
    }
}

/// Fragments `message` and pushes every piece to the outbound channel.
/// Returns false if the channel is gone (peer disconnected).
fn send_fragmented(conn: &Connection, message: &[u8]) -> bool {
    for buf in fragment::send(message) {
        if conn.outbound.send(buf).is_err() {
            return false;
        }
    }
    true
}

fn publish_status(session: &PairingSession, control: &PairingControl) {
    control.publish_status(victor_core::control::SessionStatus::from_session(
        session.state(),
        session.conn_type(),
        session.peer_pk(),
        session.challenge_attempts(),
        session.abnormality_count(),
        session.total_pairing_attempts(),
        session.channel_encrypted(),
    ));
}
