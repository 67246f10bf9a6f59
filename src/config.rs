//! Explicit configuration for opening vaults and talking to tokens.

use std::path::PathBuf;
use std::time::Duration;

use p256::PublicKey;

/// Environment variable the CLI falls back to for the vault path.
pub const VAULT_PATH_ENV: &str = "CIPHERNAUT_VAULT";

/// PIV key-management slot; holds the ECDH key by convention.
pub const SLOT_KEY_MANAGEMENT: u8 = 0x9D;

/// Default bound on a single APDU exchange.
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a vault lives and, for a new vault, which key it is bound to.
#[derive(Clone, Debug)]
pub struct VaultConfig {
    pub path: PathBuf,
    /// Required only when no container exists at `path` yet.
    pub public_key: Option<PublicKey>,
}

impl VaultConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            public_key: None,
        }
    }

    pub fn with_public_key(mut self, public_key: PublicKey) -> Self {
        self.public_key = Some(public_key);
        self
    }

    /// Read the path from `CIPHERNAUT_VAULT`, if set and non-empty.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(VAULT_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }
}

/// PIV token settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PivConfig {
    /// Key reference of the ECDH key (`9A`, `9C`, `9D`, `9E`, `82`..`95`).
    pub slot: u8,
    /// Upper bound for each card exchange. `None` blocks until the token
    /// answers.
    pub timeout: Option<Duration>,
}

impl Default for PivConfig {
    fn default() -> Self {
        Self {
            slot: SLOT_KEY_MANAGEMENT,
            timeout: Some(DEFAULT_DEVICE_TIMEOUT),
        }
    }
}

impl PivConfig {
    pub fn with_slot(mut self, slot: u8) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}
