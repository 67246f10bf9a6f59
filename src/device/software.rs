//! In-memory device for tests and token-less setups.

use core::fmt;

use p256::{PublicKey, SecretKey};
use rand_core::{CryptoRngCore, OsRng};

use super::{agree, Device, SharedSecret};
use crate::error::{Result, VaultError};

/// Holds a P-256 key pair in process memory. Never locked.
pub struct SoftwareDevice {
    secret: SecretKey,
}

impl SoftwareDevice {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    pub fn generate_with_rng(rng: &mut impl CryptoRngCore) -> Self {
        Self {
            secret: SecretKey::random(rng),
        }
    }

    pub fn from_secret_key(secret: SecretKey) -> Self {
        Self { secret }
    }

    /// Load from a 32-byte big-endian scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(VaultError::InvalidState("software key must be 32 bytes"));
        }
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| VaultError::InvalidState("software key is not a valid P-256 scalar"))?;
        Ok(Self { secret })
    }
}

impl fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("public_key", &self.secret.public_key())
            .finish_non_exhaustive()
    }
}

impl Device for SoftwareDevice {
    fn is_locked(&self) -> bool {
        false
    }

    fn unlock(&mut self, _pin: &[u8]) -> Result<bool> {
        Ok(true)
    }

    fn public_key(&self) -> Result<PublicKey> {
        Ok(self.secret.public_key())
    }

    fn key_agreement(&self, peer: &PublicKey) -> Result<SharedSecret> {
        Ok(agree(&self.secret, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn seeded_generation_is_deterministic() {
        let a = SoftwareDevice::generate_with_rng(&mut StdRng::seed_from_u64(7));
        let b = SoftwareDevice::generate_with_rng(&mut StdRng::seed_from_u64(7));
        assert_eq!(a.public_key().unwrap(), b.public_key().unwrap());
    }

    #[test]
    fn from_bytes_roundtrip() {
        let secret = SecretKey::random(&mut OsRng);
        let device = SoftwareDevice::from_bytes(&secret.to_bytes()).unwrap();
        assert_eq!(device.public_key().unwrap(), secret.public_key());
    }

    #[test]
    fn from_bytes_rejects_bad_input() {
        assert!(SoftwareDevice::from_bytes(&[1u8; 31]).is_err());
        assert!(SoftwareDevice::from_bytes(&[0u8; 32]).is_err());
        assert!(SoftwareDevice::from_bytes(&[0xFFu8; 32]).is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let device = SoftwareDevice::generate();
        let shown = format!("{:?}", device);
        assert!(shown.contains("public_key"));
        assert!(!shown.contains("secret"));
    }
}
