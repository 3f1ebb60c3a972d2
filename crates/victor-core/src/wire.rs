//! Victor wire format — on-wire types for the pairing protocol.
//!
//! These types ARE the protocol. Every field, every size, every reserved
//! byte is part of the wire format a real companion app speaks.
//!
//! All payload types are #[repr(C, packed)] for deterministic layout and
//! use zerocopy derives for safe, allocation-free serialization. There is
//! no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Handshake (the very first message on any BLE connection) ─────────────────

/// Opcode of the fixed 5-byte handshake message. Never wrapped in the
/// `ExternalComms` envelope — it precedes protocol-version selection.
pub const MSG_HANDSHAKE: u8 = 0x07;

/// The first plaintext message of a BLE connection: 1-byte opcode, then a
/// little-endian uint32 protocol version. Wire size: 5 bytes, fixed forever.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct HandshakeMessage {
    pub opcode: u8,
    pub version: u32,
}

assert_eq_size!(HandshakeMessage, [u8; 5]);

impl HandshakeMessage {
    pub fn new(version: u32) -> Self {
        Self {
            opcode: MSG_HANDSHAKE,
            version,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 5 {
            return Err(WireError::Truncated {
                expected: 5,
                got: buf.len(),
            });
        }
        let msg = HandshakeMessage::read_from_prefix(buf).ok_or(WireError::Truncated {
            expected: 5,
            got: buf.len(),
        })?;
        if msg.opcode != MSG_HANDSHAKE {
            return Err(WireError::UnexpectedOpcode(msg.opcode));
        }
        Ok(msg)
    }
}

// ── ConnType ──────────────────────────────────────────────────────────────────

/// Distinguishes whether the keyring is consulted for session key reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnType {
    FirstTimePair = 0x01,
    Reconnection = 0x02,
}

impl TryFrom<u8> for ConnType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ConnType::FirstTimePair),
            0x02 => Ok(ConnType::Reconnection),
            other => Err(WireError::UnknownConnType(other)),
        }
    }
}

// ── RtsConnection_3 variant tag ───────────────────────────────────────────────

/// The `RtsConnection_3` tag, selecting which variant follows inside the
/// `ExternalComms { RtsConnection { RtsConnection_3 { .. } } }` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtsTag {
    ConnRequest = 0x01,
    ConnResponse = 0x02,
    NonceMessage = 0x03,
    Ack = 0x04,
    ChallengeMessage = 0x05,
    ChallengeSuccessMessage = 0x06,
    CancelPairing = 0x07,
}

impl TryFrom<u8> for RtsTag {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(RtsTag::ConnRequest),
            0x02 => Ok(RtsTag::ConnResponse),
            0x03 => Ok(RtsTag::NonceMessage),
            0x04 => Ok(RtsTag::Ack),
            0x05 => Ok(RtsTag::ChallengeMessage),
            0x06 => Ok(RtsTag::ChallengeSuccessMessage),
            0x07 => Ok(RtsTag::CancelPairing),
            other => Err(WireError::UnknownTag(other)),
        }
    }
}

// ── RtsConnRequest (robot -> peer) ────────────────────────────────────────────

/// Wire size: 32 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RtsConnRequest {
    pub pk: [u8; 32],
}

assert_eq_size!(RtsConnRequest, [u8; 32]);

// ── RtsConnResponse (peer -> robot) ───────────────────────────────────────────

/// Wire size: 33 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RtsConnResponse {
    pub conn_type: u8,
    pub pk: [u8; 32],
}

assert_eq_size!(RtsConnResponse, [u8; 33]);

// ── RtsNonceMessage (robot -> peer, cleartext) ────────────────────────────────

/// Wire size: 48 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RtsNonceMessage {
    pub to_robot_nonce: [u8; 24],
    pub to_device_nonce: [u8; 24],
}

assert_eq_size!(RtsNonceMessage, [u8; 48]);

// ── RtsAck (peer -> robot, cleartext) ─────────────────────────────────────────

/// `ack_type` identifies which prior message is being acknowledged.
/// For the core's purposes, only acknowledgement of `RtsNonceMessage`
/// (value 0x01) is meaningful.
pub const ACK_NONCE_MESSAGE: u8 = 0x01;

/// Wire size: 1 byte.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RtsAck {
    pub ack_type: u8,
}

assert_eq_size!(RtsAck, [u8; 1]);

// ── RtsChallengeMessage (both directions, encrypted) ──────────────────────────

/// Wire size: 4 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RtsChallengeMessage {
    pub number: u32,
}

assert_eq_size!(RtsChallengeMessage, [u8; 4]);

// ── RtsChallengeSuccessMessage / RtsCancelPairing (empty payloads) ───────────

/// Wire size: 0 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RtsChallengeSuccessMessage;

assert_eq_size!(RtsChallengeSuccessMessage, [u8; 0]);

/// Wire size: 0 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RtsCancelPairing;

assert_eq_size!(RtsCancelPairing, [u8; 0]);

// ── Envelope encode/decode ────────────────────────────────────────────────────

/// A decoded `RtsConnection_3` variant. The `ExternalComms { RtsConnection
/// { RtsConnection_3 { .. } } }` wrapping exists only on the wire — once
/// parsed, callers work with this flat enum.
#[derive(Debug, Clone)]
pub enum RtsMessage {
    ConnRequest(RtsConnRequest),
    ConnResponse(RtsConnResponse),
    NonceMessage(RtsNonceMessage),
    Ack(RtsAck),
    ChallengeMessage(RtsChallengeMessage),
    ChallengeSuccessMessage,
    CancelPairing,
}

impl RtsMessage {
    /// Serialize into the wire envelope: one tag byte followed by the
    /// variant's fixed-size payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 33);
        match self {
            RtsMessage::ConnRequest(m) => {
                out.push(RtsTag::ConnRequest as u8);
                out.extend_from_slice(m.as_bytes());
            }
            RtsMessage::ConnResponse(m) => {
                out.push(RtsTag::ConnResponse as u8);
                out.extend_from_slice(m.as_bytes());
            }
            RtsMessage::NonceMessage(m) => {
                out.push(RtsTag::NonceMessage as u8);
                out.extend_from_slice(m.as_bytes());
            }
            RtsMessage::Ack(m) => {
                out.push(RtsTag::Ack as u8);
                out.extend_from_slice(m.as_bytes());
            }
            RtsMessage::ChallengeMessage(m) => {
                out.push(RtsTag::ChallengeMessage as u8);
                out.extend_from_slice(m.as_bytes());
            }
            RtsMessage::ChallengeSuccessMessage => {
                out.push(RtsTag::ChallengeSuccessMessage as u8);
            }
            RtsMessage::CancelPairing => {
                out.push(RtsTag::CancelPairing as u8);
            }
        }
        out
    }

    /// Parse a wire envelope. A length shorter than 2 (tag + at least
    /// some payload for non-empty variants is checked per-variant) is
    /// `MalformedMessage` per the core's error taxonomy.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.is_empty() {
            return Err(WireError::Truncated {
                expected: 1,
                got: 0,
            });
        }
        let tag = RtsTag::try_from(buf[0])?;
        let payload = &buf[1..];
        match tag {
            RtsTag::ConnRequest => {
                let m = RtsConnRequest::read_from(payload).ok_or(WireError::Truncated {
                    expected: 1 + 32,
                    got: buf.len(),
                })?;
                Ok(RtsMessage::ConnRequest(m))
            }
            RtsTag::ConnResponse => {
                let m = RtsConnResponse::read_from(payload).ok_or(WireError::Truncated {
                    expected: 1 + 33,
                    got: buf.len(),
                })?;
                Ok(RtsMessage::ConnResponse(m))
            }
            RtsTag::NonceMessage => {
                let m = RtsNonceMessage::read_from(payload).ok_or(WireError::Truncated {
                    expected: 1 + 48,
                    got: buf.len(),
                })?;
                Ok(RtsMessage::NonceMessage(m))
            }
            RtsTag::Ack => {
                let m = RtsAck::read_from(payload).ok_or(WireError::Truncated {
                    expected: 1 + 1,
                    got: buf.len(),
                })?;
                Ok(RtsMessage::Ack(m))
            }
            RtsTag::ChallengeMessage => {
                let m = RtsChallengeMessage::read_from(payload).ok_or(WireError::Truncated {
                    expected: 1 + 4,
                    got: buf.len(),
                })?;
                Ok(RtsMessage::ChallengeMessage(m))
            }
            RtsTag::ChallengeSuccessMessage => Ok(RtsMessage::ChallengeSuccessMessage),
            RtsTag::CancelPairing => Ok(RtsMessage::CancelPairing),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown RTS variant tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("unknown ConnType byte: 0x{0:02x}")]
    UnknownConnType(u8),

    #[error("unexpected handshake opcode: 0x{0:02x}")]
    UnexpectedOpcode(u8),

    #[error("message truncated: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
