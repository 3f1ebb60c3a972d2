//! Shared operator control surface: whether pairing mode is armed, and the
//! latest status snapshot published by the active session executor.
//!
//! A session executor consults [`PairingControl::is_armed`] on every
//! message it processes rather than latching the value once at accept
//! time, so `begin_pairing`/`stop_pairing` take effect on connections that
//! are already sitting at the handshake phase. It calls
//! [`PairingControl::publish_status`] after every state transition so
//! `GET /api/pairing/status` always reflects the live session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::pairing::State;
use crate::wire::ConnType;

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: String,
    pub conn_type: Option<String>,
    pub peer_pubkey: Option<String>,
    pub challenge_attempts: u32,
    pub abnormality_count: u32,
    pub total_pairing_attempts: u32,
    pub channel_encrypted: bool,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            state: format!("{:?}", State::Initial),
            conn_type: None,
            peer_pubkey: None,
            challenge_attempts: 0,
            abnormality_count: 0,
            total_pairing_attempts: 0,
            channel_encrypted: false,
        }
    }

    pub fn from_session(
        state: State,
        conn_type: Option<ConnType>,
        peer_pk: Option<[u8; 32]>,
        challenge_attempts: u32,
        abnormality_count: u32,
        total_pairing_attempts: u32,
        channel_encrypted: bool,
    ) -> Self {
        Self {
            state: format!("{state:?}"),
            conn_type: conn_type.map(|c| format!("{c:?}")),
            peer_pubkey: peer_pk.map(hex::encode),
            challenge_attempts,
            abnormality_count,
            total_pairing_attempts,
            channel_encrypted,
        }
    }
}

#[derive(Clone)]
pub struct PairingControl {
    armed: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
}

impl PairingControl {
    pub fn new() -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::idle())),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn publish_status(&self, status: SessionStatus) {
        *self.status.lock().expect("status lock poisoned") = status;
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().expect("status lock poisoned").clone()
    }
}

impl Default for PairingControl {
    fn default() -> Self {
        Self::new()
    }
}
