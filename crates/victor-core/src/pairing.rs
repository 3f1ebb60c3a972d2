//! The V3 pairing state machine.
//!
//! Drives one BLE connection from the initial version handshake through a
//! confirmed shared secret. Callers (the session executor in victord) feed
//! it wire bytes and phase-timeout ticks; it returns wire bytes to send, or
//! signals completion/restart/termination.
//!
//! State flow:
//!
//!   Initial --begin()--> AwaitingHandshake --HandshakeMessage(v3)-->
//!   AwaitingPublicKey --ConnRequest--> AwaitingNonceAck --Ack-->
//!   AwaitingChallengeResponse --correct challenge reply-->
//!   ConfirmedSharedSecret
//!
//! Any out-of-order message is an abnormality, not automatically fatal.
//! `CancelPairing`, a phase timeout, or a wrong challenge reply (mistyped
//! PIN) restarts the whole machine back to `AwaitingHandshake` with a fresh
//! PIN and challenge on the next `ConnRequest`. Exhausting `max_restarts`
//! (total_pairing_attempts) or `max_abnormality` is fatal — the caller
//! drops the connection. A *decryption* failure in
//! `AwaitingChallengeResponse` is treated differently from a wrong reply:
//! it can't be recovered by retrying with a new PIN, so it is only counted
//! (`max_challenge_attempts`) and never itself restarts; exhausting that
//! cap is also fatal.

use thiserror::Error;

use crate::config::PairingConfig;
use crate::crypto::Keypair;
use crate::keyex::{self, KeyExchangeError, PIN_LEN};
use crate::keyring::ClientRecord;
use crate::record::RecordLayer;
use crate::wire::{
    ConnType, HandshakeMessage, RtsAck, RtsChallengeMessage, RtsConnRequest, RtsConnResponse,
    RtsMessage, RtsNonceMessage, WireError, ACK_NONCE_MESSAGE,
};
use zerocopy::AsBytes;

/// The only protocol version this handler speaks. Anything else routes to
/// the legacy V2 handler.
pub const PROTOCOL_VERSION_V3: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    AwaitingHandshake,
    AwaitingPublicKey,
    AwaitingNonceAck,
    AwaitingChallengeResponse,
    ConfirmedSharedSecret,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Initial => "Initial",
            State::AwaitingHandshake => "AwaitingHandshake",
            State::AwaitingPublicKey => "AwaitingPublicKey",
            State::AwaitingNonceAck => "AwaitingNonceAck",
            State::AwaitingChallengeResponse => "AwaitingChallengeResponse",
            State::ConfirmedSharedSecret => "ConfirmedSharedSecret",
        }
    }
}

/// Looks up and records per-client key material. Backed by the on-disk
/// keyring in production; an in-memory map in tests.
pub trait ClientStore {
    fn lookup(&self, pk_client: &[u8; 32]) -> Option<([u8; 32], [u8; 32])>;
    fn upsert(&mut self, record: ClientRecord);
}

/// Everything produced once a session reaches `ConfirmedSharedSecret`.
pub struct CompletedSession {
    pub record: RecordLayer,
    pub conn_type: ConnType,
    pub peer_pk: [u8; 32],
    /// Shown on the robot's display during first-time pairing; `None` on
    /// reconnection, where no PIN is involved.
    pub pin: Option<[u8; PIN_LEN]>,
    /// The encrypted `ChallengeSuccessMessage` the caller must send before
    /// handing the connection off to ordinary application traffic.
    pub success_reply: Vec<u8>,
}

/// What happened as a result of feeding one event into the state machine.
pub enum PairingEvent {
    /// Wire-encoded messages to send, in order. Each is fragmented
    /// independently by the transport layer.
    Reply(Vec<Vec<u8>>),
    /// The machine restarted (abnormality cap, explicit cancel, or
    /// timeout). The caller should re-arm its phase timer.
    Restarted,
    /// Pairing succeeded; the session is ready to save and hand off.
    Completed(CompletedSession),
}

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("unexpected message for state {0}")]
    UnexpectedState(&'static str),

    #[error("unsupported handshake version {0}, route to legacy handler")]
    UnsupportedVersion(u32),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    KeyExchange(#[from] KeyExchangeError),

    #[error("challenge response did not match the expected value")]
    ChallengeFailed,

    #[error("too many pairing restarts, dropping connection")]
    TooManyRestarts,

    #[error("too many failed challenge-response decryptions, dropping connection")]
    TooManyChallengeFailures,

    #[error("too many abnormal messages, dropping connection")]
    TooManyAbnormalities,
}

/// Routes the very first 5 bytes of a connection to the V3 handler or the
/// legacy reject-only stub, without committing to either protocol.
pub fn route_handshake(buf: &[u8]) -> Result<u32, WireError> {
    let msg = HandshakeMessage::parse(buf)?;
    Ok(msg.version)
}

/// The legacy handler: V2 clients are always rejected. The protocol never
/// shipped a V2 companion app capable of completing this handshake, so the
/// only correct behavior is to refuse and close the connection.
pub fn reject_legacy_client(version: u32) -> PairingError {
    PairingError::UnsupportedVersion(version)
}

pub struct PairingSession {
    identity: Keypair,
    policy: PairingConfig,
    state: State,
    peer_pk: Option<[u8; 32]>,
    conn_type: Option<ConnType>,
    pin: Option<[u8; PIN_LEN]>,
    pending_keys: Option<([u8; 32], [u8; 32])>, // (sk_tx, sk_rx)
    pending_nonces: Option<([u8; 24], [u8; 24])>, // (to_device_nonce, to_robot_nonce)
    expected_challenge_reply: Option<u32>,
    record: Option<RecordLayer>,
    challenge_attempts: u32,
    abnormality_count: u32,
    total_pairing_attempts: u32,
    pairing_armed: bool,
}

impl PairingSession {
    pub fn new(identity: Keypair, policy: PairingConfig) -> Self {
        Self {
            identity,
            policy,
            state: State::Initial,
            peer_pk: None,
            conn_type: None,
            pin: None,
            pending_keys: None,
            pending_nonces: None,
            expected_challenge_reply: None,
            record: None,
            challenge_attempts: 0,
            abnormality_count: 0,
            total_pairing_attempts: 0,
            pairing_armed: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn conn_type(&self) -> Option<ConnType> {
        self.conn_type
    }

    pub fn peer_pk(&self) -> Option<[u8; 32]> {
        self.peer_pk
    }

    pub fn abnormality_count(&self) -> u32 {
        self.abnormality_count
    }

    pub fn challenge_attempts(&self) -> u32 {
        self.challenge_attempts
    }

    pub fn total_pairing_attempts(&self) -> u32 {
        self.total_pairing_attempts
    }

    pub fn channel_encrypted(&self) -> bool {
        self.record.is_some()
    }

    /// The PIN generated for the in-progress first-time pair, if any. Set as
    /// soon as `ConnRequest` establishes `ConnType::FirstTimePair`, well
    /// before the challenge exchange completes — callers display it
    /// immediately rather than waiting for `CompletedSession::pin`.
    pub fn pin(&self) -> Option<[u8; PIN_LEN]> {
        self.pin
    }

    /// Mirrors the upward interface's `set_is_pairing`: while
    /// `policy.require_pairing_mode` is set, a first-time `ConnRequest` is
    /// refused unless this has been armed. Reconnections are never gated.
    pub fn set_pairing_armed(&mut self, armed: bool) {
        self.pairing_armed = armed;
    }

    pub fn pairing_armed(&self) -> bool {
        self.pairing_armed
    }

    /// Call once the BLE connection is accepted, before any bytes arrive.
    pub fn begin(&mut self) {
        self.state = State::AwaitingHandshake;
    }

    /// Feed the 5-byte handshake message. Returns the version-echo reply on
    /// success.
    pub fn handle_handshake(&mut self, buf: &[u8]) -> Result<Vec<u8>, PairingError> {
        if self.state != State::AwaitingHandshake {
            return self.abnormal(State::AwaitingHandshake);
        }
        let version = route_handshake(buf)?;
        if version != PROTOCOL_VERSION_V3 {
            return Err(reject_legacy_client(version));
        }
        self.state = State::AwaitingPublicKey;
        Ok(HandshakeMessage::new(PROTOCOL_VERSION_V3).as_bytes().to_vec())
    }

    /// Feed one RTS message (post version-handshake). Once the encrypted
    /// channel is up (`AwaitingChallengeResponse` onward) `buf` is the raw
    /// AEAD ciphertext off the wire; earlier phases are cleartext.
    pub fn handle_rts(
        &mut self,
        buf: &[u8],
        store: &mut dyn ClientStore,
    ) -> Result<PairingEvent, PairingError> {
        let plaintext;
        let decoded_buf: &[u8] = if self.state == State::AwaitingChallengeResponse {
            let record = self
                .record
                .as_mut()
                .expect("record set when entering AwaitingChallengeResponse");
            match record.decrypt(buf) {
                Ok(pt) => {
                    plaintext = pt;
                    &plaintext
                }
                Err(_) => {
                    // Garbage or replayed ciphertext never advances the rx
                    // nonce and never reaches the challenge-number check —
                    // it is counted and capped on its own, independent of
                    // wrong-number retries, since unlike a mistyped PIN it
                    // isn't recoverable by trying again with a new one.
                    self.challenge_attempts += 1;
                    if self.challenge_attempts >= self.policy.max_challenge_attempts {
                        return Err(PairingError::TooManyChallengeFailures);
                    }
                    return Err(PairingError::ChallengeFailed);
                }
            }
        } else {
            buf
        };
        let msg = RtsMessage::decode(decoded_buf)?;

        if let RtsMessage::CancelPairing = msg {
            return self.restart();
        }

        match (self.state, msg) {
            (State::AwaitingPublicKey, RtsMessage::ConnRequest(req)) => {
                self.handle_conn_request(req, store)
            }
            (State::AwaitingNonceAck, RtsMessage::Ack(ack)) => self.handle_nonce_ack(ack),
            (State::AwaitingChallengeResponse, RtsMessage::ChallengeMessage(reply)) => {
                self.handle_challenge_reply(reply, store)
            }
            (state, _) => self.abnormal_event(state),
        }
    }

    fn handle_conn_request(
        &mut self,
        req: RtsConnRequest,
        store: &mut dyn ClientStore,
    ) -> Result<PairingEvent, PairingError> {
        let pk = req.pk;

        let is_known = store.lookup(&pk).is_some();
        if !is_known && self.policy.require_pairing_mode && !self.pairing_armed {
            return self.abnormal_event(self.state);
        }

        self.peer_pk = Some(pk);

        let (conn_type, sk_tx, sk_rx, pin) = match store.lookup(&pk) {
            Some((sk_rx, sk_tx)) => (ConnType::Reconnection, sk_tx, sk_rx, None),
            None => {
                let pin = keyex::generate_pin();
                let derived = keyex::derive_robot_keys(&self.identity, &pk, &pin)?;
                (
                    ConnType::FirstTimePair,
                    derived.sk_tx,
                    derived.sk_rx,
                    Some(pin),
                )
            }
        };

        self.conn_type = Some(conn_type);
        self.pin = pin;
        self.pending_keys = Some((sk_tx, sk_rx));

        let to_device_nonce = keyex::generate_nonce24();
        let to_robot_nonce = keyex::generate_nonce24();
        self.pending_nonces = Some((to_device_nonce, to_robot_nonce));

        let conn_response = RtsMessage::ConnResponse(RtsConnResponse {
            conn_type: conn_type as u8,
            pk: self.identity.public,
        })
        .encode();
        let nonce_message = RtsMessage::NonceMessage(RtsNonceMessage {
            to_robot_nonce,
            to_device_nonce,
        })
        .encode();

        self.state = State::AwaitingNonceAck;
        Ok(PairingEvent::Reply(vec![conn_response, nonce_message]))
    }

    fn handle_nonce_ack(&mut self, ack: RtsAck) -> Result<PairingEvent, PairingError> {
        if ack.ack_type != ACK_NONCE_MESSAGE {
            return self.abnormal_event(self.state);
        }

        // Copied, not taken: `upsert_client_record` needs these again once
        // the challenge succeeds, and `[u8; 32]` is cheap to copy.
        let (sk_tx, sk_rx) = self
            .pending_keys
            .expect("pending_keys set when entering AwaitingNonceAck");
        let (to_device_nonce, to_robot_nonce) = self
            .pending_nonces
            .take()
            .expect("pending_nonces set when entering AwaitingNonceAck");

        let mut record = RecordLayer::new(sk_tx, sk_rx, to_device_nonce, to_robot_nonce);

        let challenge_number: u32 = rand::random();
        self.expected_challenge_reply = Some(challenge_number.wrapping_add(1));

        let plaintext = RtsMessage::ChallengeMessage(RtsChallengeMessage {
            number: challenge_number,
        })
        .encode();
        let ciphertext = record
            .encrypt(&plaintext)
            .map_err(|_| PairingError::ChallengeFailed)?;

        self.record = Some(record);
        self.state = State::AwaitingChallengeResponse;
        Ok(PairingEvent::Reply(vec![ciphertext]))
    }

    fn handle_challenge_reply(
        &mut self,
        reply: RtsChallengeMessage,
        store: &mut dyn ClientStore,
    ) -> Result<PairingEvent, PairingError> {
        let expected = self
            .expected_challenge_reply
            .expect("expected_challenge_reply set when entering AwaitingChallengeResponse");

        if reply.number != expected {
            // A wrong reply means the PIN was mistyped, not that the channel
            // is under attack — restart back to a fresh handshake with a new
            // PIN and challenge, the same recovery `CancelPairing` gets.
            // `restart()` is what actually enforces `max_restarts`; this is
            // also counted as an abnormality and a challenge attempt for
            // `GET /api/pairing/status` reporting.
            self.abnormality_count += 1;
            self.challenge_attempts += 1;
            return self.restart();
        }

        let mut record = self
            .record
            .take()
            .expect("record set when entering AwaitingChallengeResponse");
        let conn_type = self.conn_type.expect("conn_type set by ConnRequest");
        let peer_pk = self.peer_pk.expect("peer_pk set by ConnRequest");
        let pin = self.pin;
        let (sk_tx, sk_rx) = self
            .pending_keys
            .take()
            .expect("pending_keys set by ConnRequest");

        if conn_type == ConnType::FirstTimePair {
            store.upsert(ClientRecord {
                pk_client: peer_pk,
                sk_rx,
                sk_tx,
            });
        }

        let success_reply = record
            .encrypt(&RtsMessage::ChallengeSuccessMessage.encode())
            .map_err(|_| PairingError::ChallengeFailed)?;

        self.state = State::ConfirmedSharedSecret;

        Ok(PairingEvent::Completed(CompletedSession {
            record,
            conn_type,
            peer_pk,
            pin,
            success_reply,
        }))
    }

    /// Called by the session executor when a phase timer expires.
    pub fn handle_timeout(&mut self) -> Result<PairingEvent, PairingError> {
        self.restart()
    }

    fn restart(&mut self) -> Result<PairingEvent, PairingError> {
        self.total_pairing_attempts += 1;
        if self.total_pairing_attempts >= self.policy.max_restarts {
            return Err(PairingError::TooManyRestarts);
        }
        self.reset_to_initial();
        Ok(PairingEvent::Restarted)
    }

    fn note_abnormality(&mut self, expected: State) -> PairingError {
        self.abnormality_count += 1;
        if self.abnormality_count >= self.policy.max_abnormality {
            PairingError::TooManyAbnormalities
        } else {
            PairingError::UnexpectedState(expected.name())
        }
    }

    fn abnormal(&mut self, expected: State) -> Result<Vec<u8>, PairingError> {
        Err(self.note_abnormality(expected))
    }

    fn abnormal_event(&mut self, expected: State) -> Result<PairingEvent, PairingError> {
        Err(self.note_abnormality(expected))
    }

    /// Resets pairing-specific state so a fresh `HandshakeMessage` can be
    /// accepted on the same still-open BLE connection. `State::Initial`
    /// itself is only ever the pre-`begin()` value.
    fn reset_to_initial(&mut self) {
        self.state = State::AwaitingHandshake;
        self.peer_pk = None;
        self.conn_type = None;
        self.pin = None;
        self.pending_keys = None;
        self.pending_nonces = None;
        self.expected_challenge_reply = None;
        if let Some(record) = &mut self.record {
            record.zeroize_all();
        }
        self.record = None;
    }
}
