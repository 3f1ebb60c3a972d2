//! Low-level cryptographic primitives shared by key exchange and keyring.
//!
//! Provides the X25519 `Keypair` type used for both the robot's own
//! identity key and per-client static keys. All key material derives
//! ZeroizeOnDrop — wiped from memory when dropped. There is no unsafe code
//! in this module.

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// An X25519 keypair — the robot's identity key or a client's static key.
///
/// The private key never leaves this struct except via [`Keypair::private_bytes`]
/// for persistence, and is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    private: Zeroizing<[u8; 32]>,
    #[zeroize(skip)]
    pub public: [u8; 32],
}

impl Keypair {
    /// Generate a new random X25519 keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    /// Reconstruct a keypair from stored private key bytes. The public key
    /// is re-derived, never stored — callers use this to validate a loaded
    /// identity block (stored public must match the recomputed one).
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    /// Serialize the private key for persistent storage in the keyring.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    /// Raw X25519 Diffie-Hellman with a peer's public key.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(*self.private);
        let peer = PublicKey::from(*peer_public);
        *secret.diffie_hellman(&peer).as_bytes()
    }
}
