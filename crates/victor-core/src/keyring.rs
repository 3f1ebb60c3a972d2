//! Persistent on-disk keyring: the robot's identity keypair, its display
//! name, and the per-client key material accumulated across pairings.
//!
//! Layout (all integers little-endian):
//!
//!   magic          [u8; 8]   "ANKIBITS"
//!   version        u32
//!   pk_id          [u8; 32]
//!   sk_id          [u8; 32]
//!   has_name       u8        0 or 1
//!   name           [u8; 16]  zero-padded ASCII, valid only if has_name = 1
//!   client_count   u32
//!   clients[..]    ClientRecord
//!
//! ClientRecord:
//!   pk_client      [u8; 32]
//!   sk_rx          [u8; 32]
//!   sk_tx          [u8; 32]
//!
//! Writes are atomic: the new contents land in a sibling temp file which is
//! then renamed over the real path. A keyring that fails to parse, or whose
//! identity keypair does not validate (stored public key does not match the
//! one recomputed from the stored private key), is treated as unrecoverable
//! and replaced with a freshly generated identity and an empty client list.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use rand::RngCore;
use thiserror::Error;

use crate::crypto::Keypair;

const MAGIC: &[u8; 8] = b"ANKIBITS";
const VERSION: u32 = 1;
const NAME_LEN: usize = 16;

pub struct ClientRecord {
    pub pk_client: [u8; 32],
    pub sk_rx: [u8; 32],
    pub sk_tx: [u8; 32],
}

pub struct Keyring {
    pub identity: Keypair,
    pub name: Option<String>,
    pub clients: Vec<ClientRecord>,
}

impl Keyring {
    /// Load the keyring at `path`, or synthesize a fresh one (new identity,
    /// no clients, no name) if the file is absent, truncated, or fails
    /// validation. A freshly synthesized keyring is not written to disk
    /// here — callers should `save()` after any provisioning (e.g. name
    /// assignment) they want to persist.
    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match Self::parse(&bytes) {
                Ok(keyring) => keyring,
                Err(_) => Self::fresh(),
            },
            Err(_) => Self::fresh(),
        }
    }

    fn fresh() -> Self {
        Self {
            identity: Keypair::generate(),
            name: None,
            clients: Vec::new(),
        }
    }

    /// Assign a robot name if none is set yet, following the `Vector XYZW`
    /// pattern: a fixed prefix followed by 4 characters alternating
    /// uppercase letter and digit.
    pub fn ensure_name(&mut self) -> &str {
        if self.name.is_none() {
            self.name = Some(generate_robot_name());
        }
        self.name.as_deref().unwrap()
    }

    fn parse(bytes: &[u8]) -> Result<Self, KeyringError> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.take(8)?;
        if magic != MAGIC {
            return Err(KeyringError::BadMagic);
        }

        let version = u32::from_le_bytes(cursor.take(4)?.try_into().unwrap());
        if version != VERSION {
            return Err(KeyringError::UnsupportedVersion(version));
        }

        let pk_id: [u8; 32] = cursor.take(32)?.try_into().unwrap();
        let sk_id: [u8; 32] = cursor.take(32)?.try_into().unwrap();

        let identity = Keypair::from_private(sk_id);
        if identity.public != pk_id {
            return Err(KeyringError::IdentityMismatch);
        }

        let has_name = cursor.take(1)?[0];
        let name_bytes = cursor.take(NAME_LEN)?;
        let name = if has_name == 1 {
            let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
            Some(
                std::str::from_utf8(&name_bytes[..end])
                    .map_err(|_| KeyringError::BadName)?
                    .to_string(),
            )
        } else {
            None
        };

        let client_count = u32::from_le_bytes(cursor.take(4)?.try_into().unwrap());
        let mut clients = Vec::with_capacity(client_count as usize);
        for _ in 0..client_count {
            let pk_client: [u8; 32] = cursor.take(32)?.try_into().unwrap();
            let sk_rx: [u8; 32] = cursor.take(32)?.try_into().unwrap();
            let sk_tx: [u8; 32] = cursor.take(32)?.try_into().unwrap();
            clients.push(ClientRecord {
                pk_client,
                sk_rx,
                sk_tx,
            });
        }

        Ok(Self {
            identity,
            name,
            clients,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.identity.public);
        out.extend_from_slice(&*self.identity.private_bytes());

        match &self.name {
            Some(name) => {
                out.push(1);
                let mut padded = [0u8; NAME_LEN];
                let bytes = name.as_bytes();
                let len = bytes.len().min(NAME_LEN);
                padded[..len].copy_from_slice(&bytes[..len]);
                out.extend_from_slice(&padded);
            }
            None => {
                out.push(0);
                out.extend_from_slice(&[0u8; NAME_LEN]);
            }
        }

        out.extend_from_slice(&(self.clients.len() as u32).to_le_bytes());
        for client in &self.clients {
            out.extend_from_slice(&client.pk_client);
            out.extend_from_slice(&client.sk_rx);
            out.extend_from_slice(&client.sk_tx);
        }
        out
    }

    /// Atomically persist the keyring: write to a sibling temp file, then
    /// rename over `path`. A torn write never corrupts the live keyring
    /// since the rename is the only step that touches it.
    pub fn save(&self, path: &Path) -> Result<(), KeyringError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| KeyringError::Io(path.to_path_buf(), e))?;
        }

        let tmp_path = tmp_path_for(path);
        let bytes = self.serialize();

        let mut file = open_owner_only(&tmp_path).map_err(|e| KeyringError::Io(tmp_path.clone(), e))?;
        file.write_all(&bytes)
            .map_err(|e| KeyringError::Io(tmp_path.clone(), e))?;
        file.sync_all()
            .map_err(|e| KeyringError::Io(tmp_path.clone(), e))?;

        fs::rename(&tmp_path, path).map_err(|e| KeyringError::Io(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Creates `path` for writing with owner-only permissions (0600) from the
/// start — the keyring holds `SK_id` and every client's session keys in
/// cleartext, so it must never be briefly world-readable between create and
/// chmod.
#[cfg(unix)]
fn open_owner_only(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = tmp
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tmp.set_file_name(format!("{file_name}.tmp-{}", std::process::id()));
    tmp
}

fn generate_robot_name() -> String {
    let mut rng = rand::thread_rng();
    let mut suffix = String::with_capacity(4);
    for i in 0..4 {
        if i % 2 == 0 {
            let letter = b'A' + (rng.next_u32() % 26) as u8;
            suffix.push(letter as char);
        } else {
            let digit = b'0' + (rng.next_u32() % 10) as u8;
            suffix.push(digit as char);
        }
    }
    format!("Vector {suffix}")
}

/// Minimal byte cursor used by the hand-rolled keyring parser — the format
/// is small and fixed-shape enough that pulling in a binary codec crate
/// would be overkill.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], KeyringError> {
        if self.pos + n > self.bytes.len() {
            return Err(KeyringError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("bad magic bytes — not a victor keyring")]
    BadMagic,
    #[error("unsupported keyring version {0}")]
    UnsupportedVersion(u32),
    #[error("stored identity public key does not match its private key")]
    IdentityMismatch,
    #[error("stored robot name is not valid UTF-8")]
    BadName,
    #[error("keyring file is truncated")]
    Truncated,
    #[error("I/O error at {0}: {1}")]
    Io(PathBuf, std::io::Error),
}
