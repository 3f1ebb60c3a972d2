//! Configuration system for victord.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $VICTOR_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/victor/config.toml
//!   3. ~/.config/victor/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VictorConfig {
    pub identity: IdentityConfig,
    pub pairing: PairingConfig,
    pub transport: TransportConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Path to the persistent keyring file. Created on first run with a
    /// freshly generated identity keypair and no paired clients.
    pub keyring_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Seconds a state machine phase may sit idle before it is abandoned
    /// and pairing restarts.
    pub phase_timeout_secs: u64,
    /// Pairing attempts (Initial re-entries) allowed before the session
    /// gives up and drops the connection entirely.
    pub max_restarts: u32,
    /// Abnormal messages tolerated before the session is torn down.
    pub max_abnormality: u32,
    /// Failed challenge-response decryptions tolerated before the
    /// connection is dropped outright (not a restart: garbage or replayed
    /// ciphertext, unlike a mistyped PIN, isn't recoverable by retrying).
    pub max_challenge_attempts: u32,
    /// If true, reject ConnRequest unless pairing mode was explicitly
    /// armed by an operator (via the control API).
    pub require_pairing_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address the BLE-IPC transport listens on. In production this
    /// stands in for the `ankibluetoothd` socket; here it is a loopback
    /// TCP address used during development and integration testing.
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// TCP port for the operator-facing control API.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for VictorConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            pairing: PairingConfig::default(),
            transport: TransportConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keyring_path: data_dir().join("keyring"),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            phase_timeout_secs: 60,
            max_restarts: 3,
            max_abnormality: 5,
            max_challenge_attempts: 5,
            require_pairing_mode: true,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7900".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 7901 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("victor")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("victor")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl VictorConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            VictorConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("VICTOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&VictorConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply VICTOR_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VICTOR_PAIRING__PHASE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.pairing.phase_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("VICTOR_PAIRING__REQUIRE_PAIRING_MODE") {
            self.pairing.require_pairing_mode = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("VICTOR_TRANSPORT__LISTEN_ADDR") {
            self.transport.listen_addr = v;
        }
        if let Ok(v) = std::env::var("VICTOR_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }
}
