//! Unified error type for CipherNaut.

use core::fmt;
use std::time::Duration;

/// Boxed error from the reader/channel layer, passed through unmodified.
pub type ChannelError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug)]
pub enum VaultError {
    /// Operation on an unwrapped/uninitialised key, or a vault opened
    /// without a bootstrap public key.
    InvalidState(&'static str),
    /// Unwrap attempted against a locked device.
    Locked,
    /// Unknown key reference.
    NotFound(String),
    /// Key reference collision on insert.
    Duplicate(String),
    /// Container or store payload could not be parsed.
    Corrupt(String),
    /// Wrap/unwrap produced an empty or invalid result.
    CryptoFailure(&'static str),
    /// The token answered with an unexpected status word or payload.
    Device(String),
    /// Transport failure from the card channel.
    Channel(ChannelError),
    /// A device exchange did not complete in time.
    Timeout(Duration),
    Io(std::io::Error),
}

pub type Result<T, E = VaultError> = core::result::Result<T, E>;

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Self::Locked => write!(f, "device must be unlocked before use"),
            Self::NotFound(reference) => write!(f, "key not found: {}", reference),
            Self::Duplicate(reference) => write!(f, "duplicate key reference: {}", reference),
            Self::Corrupt(msg) => write!(f, "corrupt vault: {}", msg),
            Self::CryptoFailure(msg) => write!(f, "crypto failure: {}", msg),
            Self::Device(msg) => write!(f, "device error: {}", msg),
            Self::Channel(e) => write!(f, "card channel error: {}", e),
            Self::Timeout(after) => write!(f, "device did not respond within {:?}", after),
            Self::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Channel(e) => Some(e.as_ref()),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl VaultError {
    /// True for the failures a caller can act on without inspecting the
    /// device or the file (unknown or colliding references).
    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Duplicate(_))
    }
}
