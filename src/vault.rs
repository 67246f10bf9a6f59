//! Vault handle: one container file, opened, edited in memory, flushed back.

use std::path::{Path, PathBuf};

use p256::PublicKey;
use rand_core::CryptoRngCore;
use tracing::{debug, error, info};

use crate::config::VaultConfig;
use crate::container;
use crate::envelope::{self, VaultKey};
use crate::error::{Result, VaultError};
use crate::store::KeyStore;

/// An open vault.
///
/// The whole key store is loaded on open and written back on [`Vault::flush`],
/// [`Vault::close`] or drop. Changes made since the last write are lost if the
/// process dies before one of those runs.
///
/// Exactly one handle per container file is assumed. Two handles on the same
/// path overwrite each other's changes; callers sharing a path across
/// processes must lock the file themselves.
pub struct Vault {
    path: PathBuf,
    public_key: PublicKey,
    store: KeyStore,
    closed: bool,
}

impl Vault {
    /// Open the vault at `path`, creating it in memory if no file exists.
    ///
    /// A new vault needs `public_key`; without one this is `InvalidState`.
    /// For an existing vault the persisted key is used and `public_key` is
    /// ignored.
    pub fn open(path: impl Into<PathBuf>, public_key: Option<PublicKey>) -> Result<Self> {
        let path = path.into();

        match container::read(&path)? {
            Some((persisted, blob)) => {
                if public_key.as_ref().is_some_and(|pk| pk != &persisted) {
                    debug!(
                        path = %path.display(),
                        "supplied public key differs from the persisted one; using persisted"
                    );
                }
                let store = KeyStore::from_bytes(&blob, persisted.clone())?;
                info!(path = %path.display(), keys = store.len(), "opened vault");
                Ok(Self {
                    path,
                    public_key: persisted,
                    store,
                    closed: false,
                })
            }
            None => {
                let public_key = public_key.ok_or(VaultError::InvalidState(
                    "vault must be bootstrapped with a public key",
                ))?;
                let store = KeyStore::new(public_key.clone())?;
                info!(path = %path.display(), "created vault");
                Ok(Self {
                    path,
                    public_key,
                    store,
                    closed: false,
                })
            }
        }
    }

    pub fn open_with(config: &VaultConfig) -> Result<Self> {
        Self::open(config.path.clone(), config.public_key.clone())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a wrapped key. `NotFound` if the reference is unknown.
    pub fn get(&self, reference: &str) -> Result<VaultKey> {
        self.store.get(reference)
    }

    /// Wrap `key_material` to this vault's public key and store it under
    /// `reference`. `Duplicate` if the reference is taken.
    pub fn create(&mut self, reference: &str, key_material: &[u8]) -> Result<VaultKey> {
        if self.store.contains(reference) {
            return Err(VaultError::Duplicate(reference.to_string()));
        }
        let key = envelope::wrap(reference, key_material, &self.public_key)?;
        self.insert(key)
    }

    /// [`Vault::create`] with a caller-supplied RNG for the ephemeral key.
    pub fn create_with_rng(
        &mut self,
        rng: &mut impl CryptoRngCore,
        reference: &str,
        key_material: &[u8],
    ) -> Result<VaultKey> {
        if self.store.contains(reference) {
            return Err(VaultError::Duplicate(reference.to_string()));
        }
        let key = envelope::wrap_with_rng(rng, reference, key_material, &self.public_key)?;
        self.insert(key)
    }

    fn insert(&mut self, key: VaultKey) -> Result<VaultKey> {
        self.store.insert(&key)?;
        info!(key_reference = %key.key_reference(), "stored key");
        Ok(key)
    }

    /// Stored references, sorted.
    pub fn references(&self) -> Vec<String> {
        self.store.references()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Write the container and keep the handle open.
    pub fn flush(&self) -> Result<()> {
        let blob = self.store.to_bytes()?;
        container::write(&self.path, &self.public_key, &blob)?;
        debug!(path = %self.path.display(), bytes = blob.len(), "flushed vault");
        Ok(())
    }

    /// Flush and release the handle.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.flush()
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.flush() {
            error!(path = %self.path.display(), error = %e, "failed to flush vault on drop");
        }
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("path", &self.path)
            .field("keys", &self.store.len())
            .finish_non_exhaustive()
    }
}
