//! Envelope codec: wrap key material to a vault public key, unwrap it with
//! the matching device.
//!
//! Wrap:
//!   eph       = fresh P-256 key pair
//!   ss        = ECDH(eph.secret, vault_pk)
//!   kek       = kdf::derive_kek(ss)
//!   wrapped   = AES-KW(kek, PKCS7(material))
//!   stored    = (reference, wrapped, eph.public)
//!
//! Unwrap asks the device for ECDH(device.secret, eph.public) and reverses
//! the last two steps.

use p256::ecdh::EphemeralSecret;
use p256::PublicKey;
use rand_core::{CryptoRngCore, OsRng};
use tracing::debug;
use zeroize::Zeroizing;

use crate::device::Device;
use crate::error::{Result, VaultError};
use crate::{kdf, keywrap};

/// One wrapped secret, addressed by its reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultKey {
    key_reference: String,
    wrapped_key_material: Vec<u8>,
    ephemeral_public_key: Option<PublicKey>,
    vault_public_key: PublicKey,
}

impl VaultKey {
    /// Rebuild a key from persisted parts. The wrapped bytes are taken as-is.
    pub(crate) fn from_parts(
        key_reference: String,
        wrapped_key_material: Vec<u8>,
        ephemeral_public_key: Option<PublicKey>,
        vault_public_key: PublicKey,
    ) -> Self {
        Self {
            key_reference,
            wrapped_key_material,
            ephemeral_public_key,
            vault_public_key,
        }
    }

    pub fn key_reference(&self) -> &str {
        &self.key_reference
    }

    pub fn wrapped_key_material(&self) -> &[u8] {
        &self.wrapped_key_material
    }

    pub fn ephemeral_public_key(&self) -> Option<&PublicKey> {
        self.ephemeral_public_key.as_ref()
    }

    pub fn vault_public_key(&self) -> &PublicKey {
        &self.vault_public_key
    }

    /// Recover the original key material using `device`.
    ///
    /// Fails with `InvalidState` if nothing was wrapped or the ephemeral key
    /// is missing, and with `Locked` if the device has not been unlocked.
    pub fn unwrap<D: Device + ?Sized>(&self, device: &D) -> Result<Zeroizing<Vec<u8>>> {
        if self.wrapped_key_material.is_empty() {
            return Err(VaultError::InvalidState("key material is empty"));
        }
        if device.is_locked() {
            return Err(VaultError::Locked);
        }
        let ephemeral = self
            .ephemeral_public_key
            .as_ref()
            .ok_or(VaultError::InvalidState("ephemeral public key is missing"))?;

        let shared_secret = device.key_agreement(ephemeral)?;
        let kek = kdf::derive_kek(&shared_secret[..])?;
        let material = keywrap::unwrap(&kek, &self.wrapped_key_material)?;

        debug!(key_reference = %self.key_reference, "unwrapped key");
        Ok(material)
    }
}

/// Wrap `key_material` to `vault_public_key` using the OS RNG.
pub fn wrap(
    key_reference: impl Into<String>,
    key_material: &[u8],
    vault_public_key: &PublicKey,
) -> Result<VaultKey> {
    wrap_with_rng(&mut OsRng, key_reference, key_material, vault_public_key)
}

/// Wrap with a caller-supplied RNG for the ephemeral key.
pub fn wrap_with_rng(
    rng: &mut impl CryptoRngCore,
    key_reference: impl Into<String>,
    key_material: &[u8],
    vault_public_key: &PublicKey,
) -> Result<VaultKey> {
    let key_reference = key_reference.into();

    let ephemeral = EphemeralSecret::random(rng);
    let ephemeral_public_key = ephemeral.public_key();
    let shared = ephemeral.diffie_hellman(vault_public_key);
    let kek = kdf::derive_kek(&shared.raw_secret_bytes()[..])?;

    let wrapped = keywrap::wrap(&kek, key_material)?;
    if wrapped.is_empty() {
        return Err(VaultError::CryptoFailure("wrapped key material is empty"));
    }

    debug!(key_reference = %key_reference, len = key_material.len(), "wrapped key");
    Ok(VaultKey {
        key_reference,
        wrapped_key_material: wrapped,
        ephemeral_public_key: Some(ephemeral_public_key),
        vault_public_key: vault_public_key.clone(),
    })
}
