//! First-time-pair key exchange: ECDH plus PIN-tempered key derivation.
//!
//! The raw X25519 shared secret is symmetric — both sides compute the same
//! value regardless of who calls `diffie_hellman`. Direction comes from a
//! fixed, role-based convention layered on top of that single raw value:
//!
//!   raw := ECDH(our_sk, their_pk)
//!   tempered := keyed_hash(raw, key = PIN)
//!
//!   robot:  SK_tx = tempered, SK_rx = raw
//!   device: SK_tx = raw,      SK_rx = tempered
//!
//! so the robot's outbound key is always the device's inbound key and vice
//! versa. Binding one direction to the PIN means a passive BLE observer who
//! captured both public keys still cannot derive a working session without
//! also having seen the PIN displayed on the robot's screen.
//!
//! The keyed hash is BLAKE2b with the 6 ASCII PIN digits as its key,
//! standing in for libsodium's `crypto_generichash` used by the original
//! handshake.

use blake2::digest::{consts::U32, KeyInit, Mac};
use blake2::Blake2bMac;
use rand::RngCore;
use thiserror::Error;

use crate::crypto::Keypair;

/// PINs are always 6 ASCII digits, the first never zero.
pub const PIN_LEN: usize = 6;

type Blake2bMac256 = Blake2bMac<U32>;

/// Derive the PIN-tempered key: `keyed_hash(raw_shared_secret, key = pin)`.
fn temper_with_pin(
    raw_shared_secret: &[u8; 32],
    pin: &[u8; PIN_LEN],
) -> Result<[u8; 32], KeyExchangeError> {
    let mut mac = Blake2bMac256::new_from_slice(pin).map_err(|_| KeyExchangeError::BadPinLength)?;
    mac.update(raw_shared_secret);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// One side's session keys for the new connection.
pub struct DerivedKeys {
    /// Used to encrypt outbound traffic.
    pub sk_tx: [u8; 32],
    /// Used to decrypt inbound traffic.
    pub sk_rx: [u8; 32],
}

/// Derive the robot's keys: `SK_tx` is PIN-tempered, `SK_rx` is the raw
/// ECDH output.
pub fn derive_robot_keys(
    robot_identity: &Keypair,
    device_public: &[u8; 32],
    pin: &[u8; PIN_LEN],
) -> Result<DerivedKeys, KeyExchangeError> {
    let raw = robot_identity.diffie_hellman(device_public);
    let tempered = temper_with_pin(&raw, pin)?;
    Ok(DerivedKeys {
        sk_tx: tempered,
        sk_rx: raw,
    })
}

/// Derive the device's keys: the mirror image of [`derive_robot_keys`] —
/// `SK_tx` is the raw ECDH output, `SK_rx` is PIN-tempered. Used only by
/// tests and tools that need to simulate the companion app's side of the
/// handshake; victord itself always plays the robot role.
pub fn derive_device_keys(
    device_identity: &Keypair,
    robot_public: &[u8; 32],
    pin: &[u8; PIN_LEN],
) -> Result<DerivedKeys, KeyExchangeError> {
    let raw = device_identity.diffie_hellman(robot_public);
    let tempered = temper_with_pin(&raw, pin)?;
    Ok(DerivedKeys {
        sk_tx: raw,
        sk_rx: tempered,
    })
}

/// Generate a fresh 6-digit PIN for display during first-time pairing.
/// The leading digit is never zero, matching the original handshake's
/// on-screen PIN generator.
pub fn generate_pin() -> [u8; PIN_LEN] {
    let mut rng = rand::thread_rng();
    let mut pin = [0u8; PIN_LEN];
    pin[0] = b'1' + (rng.next_u32() % 9) as u8;
    for digit in pin.iter_mut().skip(1) {
        *digit = b'0' + (rng.next_u32() % 10) as u8;
    }
    pin
}

/// Generate a fresh 24-byte starting nonce for one direction of the record
/// layer. The NonceMessage exchange carries one of these per direction;
/// each side's record layer then increments its own counter independently.
pub fn generate_nonce24() -> [u8; 24] {
    let mut nonce = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[derive(Debug, Error)]
pub enum KeyExchangeError {
    #[error("PIN must be exactly {PIN_LEN} bytes")]
    BadPinLength,
}
