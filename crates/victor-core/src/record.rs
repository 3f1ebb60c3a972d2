//! Record layer — AEAD framing for the encrypted channel.
//!
//! XChaCha20-Poly1305-IETF with empty associated data. Nonces are 24-byte
//! per-direction counters, incremented big-endian add-one on every
//! successful encrypt (sender side) or decrypt (receiver side). A
//! decryption failure never advances the nonce, so the peer can retry.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 24-byte nonce, incremented as a big-endian 192-bit counter.
pub fn increment_nonce(nonce: &mut [u8; 24]) {
    for byte in nonce.iter_mut().rev() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            break;
        }
    }
}

/// One direction's symmetric session key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(pub [u8; 32]);

/// The AEAD record layer for one session. Holds both directions' keys and
/// nonces; callers invoke it only from the core's single executor.
pub struct RecordLayer {
    tx_key: SessionKey,
    rx_key: SessionKey,
    tx_nonce: [u8; 24],
    rx_nonce: [u8; 24],
}

impl RecordLayer {
    pub fn new(
        tx_key: [u8; 32],
        rx_key: [u8; 32],
        tx_nonce: [u8; 24],
        rx_nonce: [u8; 24],
    ) -> Self {
        Self {
            tx_key: SessionKey(tx_key),
            rx_key: SessionKey(rx_key),
            tx_nonce,
            rx_nonce,
        }
    }

    /// Zero all key and nonce material in place (used by the pairing state
    /// machine's `restart`).
    pub fn zeroize_all(&mut self) {
        self.tx_key.0.zeroize();
        self.rx_key.0.zeroize();
        self.tx_nonce = [0u8; 24];
        self.rx_nonce = [0u8; 24];
    }

    pub fn tx_nonce(&self) -> &[u8; 24] {
        &self.tx_nonce
    }

    pub fn rx_nonce(&self) -> &[u8; 24] {
        &self.rx_nonce
    }

    /// Seal `plaintext`. On success the sender nonce is incremented.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, RecordError> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.tx_key.0));
        let nonce = XNonce::from_slice(&self.tx_nonce);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| RecordError::SealFailed)?;
        increment_nonce(&mut self.tx_nonce);
        Ok(ciphertext)
    }

    /// Open `ciphertext`. On success the receiver nonce is incremented. On
    /// authentication failure the nonce is left untouched and
    /// [`RecordError::DecryptionFailed`] is returned — the caller raises
    /// `failed_decryption` and treats the session as fatally desynced.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, RecordError> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.rx_key.0));
        let nonce = XNonce::from_slice(&self.rx_nonce);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| RecordError::DecryptionFailed)?;
        increment_nonce(&mut self.rx_nonce);
        Ok(plaintext)
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("AEAD seal failed — this should never happen for well-formed inputs")]
    SealFailed,

    #[error("AEAD tag verification failed")]
    DecryptionFailed,
}
