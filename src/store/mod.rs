//! Key store: wrapped-key records indexed by reference.

use p256::PublicKey;
use serde::{Deserialize, Serialize};

use crate::envelope::VaultKey;
use crate::error::{Result, VaultError};

pub mod engine;

pub use engine::{Database, STORE_FORMAT_VERSION};

pub const KEYS_COLLECTION: &str = "keys";
const KEY_REFERENCE_FIELD: &str = "key_reference";

/// Persisted form of a [`VaultKey`]. The vault public key is not stored per
/// record; it is re-attached from the container on load.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct KeyRecord {
    key_reference: String,
    wrapped_key_hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ephemeral_public_key_hex: Option<String>,
}

impl KeyRecord {
    fn from_key(key: &VaultKey) -> Self {
        Self {
            key_reference: key.key_reference().to_string(),
            wrapped_key_hex: hex::encode(key.wrapped_key_material()),
            ephemeral_public_key_hex: key
                .ephemeral_public_key()
                .map(|pk| hex::encode(pk.to_sec1_bytes())),
        }
    }

    fn into_key(self, vault_public_key: &PublicKey) -> Result<VaultKey> {
        let wrapped = hex::decode(&self.wrapped_key_hex)
            .map_err(|e| VaultError::Corrupt(format!("{}: wrapped key: {}", self.key_reference, e)))?;
        let ephemeral = self
            .ephemeral_public_key_hex
            .as_deref()
            .map(|h| {
                let bytes = hex::decode(h).map_err(|e| {
                    VaultError::Corrupt(format!("{}: ephemeral key: {}", self.key_reference, e))
                })?;
                PublicKey::from_sec1_bytes(&bytes).map_err(|_| {
                    VaultError::Corrupt(format!("{}: ephemeral key is not a P-256 point", self.key_reference))
                })
            })
            .transpose()?;

        Ok(VaultKey::from_parts(
            self.key_reference,
            wrapped,
            ephemeral,
            vault_public_key.clone(),
        ))
    }
}

/// In-memory key collection for one vault.
pub struct KeyStore {
    db: Database,
    vault_public_key: PublicKey,
}

impl KeyStore {
    /// Empty store bound to `vault_public_key`.
    pub fn new(vault_public_key: PublicKey) -> Result<Self> {
        Self::with_database(Database::new(), vault_public_key)
    }

    /// Rehydrate from a blob produced by [`KeyStore::to_bytes`].
    pub fn from_bytes(blob: &[u8], vault_public_key: PublicKey) -> Result<Self> {
        Self::with_database(Database::open(blob)?, vault_public_key)
    }

    fn with_database(mut db: Database, vault_public_key: PublicKey) -> Result<Self> {
        db.collection_mut(KEYS_COLLECTION)
            .ensure_unique_index(KEY_REFERENCE_FIELD)
            .map_err(|e| match e {
                VaultError::Duplicate(r) => VaultError::Corrupt(format!("duplicate reference {}", r)),
                other => other,
            })?;
        Ok(Self { db, vault_public_key })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.db.serialize()
    }

    pub fn vault_public_key(&self) -> &PublicKey {
        &self.vault_public_key
    }

    /// Insert a wrapped key. `Duplicate` if the reference exists.
    pub fn insert(&mut self, key: &VaultKey) -> Result<()> {
        if key.vault_public_key() != &self.vault_public_key {
            return Err(VaultError::InvalidState("key was wrapped for a different vault"));
        }
        self.db
            .collection_mut(KEYS_COLLECTION)
            .insert(&KeyRecord::from_key(key))
    }

    /// Look up a key. `NotFound` if absent.
    pub fn get(&self, reference: &str) -> Result<VaultKey> {
        let record = match self.db.collection(KEYS_COLLECTION) {
            Some(keys) => keys.find_one::<KeyRecord>(KEY_REFERENCE_FIELD, reference)?,
            None => None,
        };
        record
            .ok_or_else(|| VaultError::NotFound(reference.to_string()))?
            .into_key(&self.vault_public_key)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.db
            .collection(KEYS_COLLECTION)
            .map(|keys| keys.values(KEY_REFERENCE_FIELD).any(|r| r == reference))
            .unwrap_or(false)
    }

    /// All references, sorted.
    pub fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .db
            .collection(KEYS_COLLECTION)
            .map(|keys| keys.values(KEY_REFERENCE_FIELD).map(str::to_string).collect())
            .unwrap_or_default();
        refs.sort();
        refs
    }

    pub fn len(&self) -> usize {
        self.db.collection(KEYS_COLLECTION).map_or(0, |keys| keys.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
