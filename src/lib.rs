//! # CipherNaut
//!
//! Hardware-bound secret vault. Key material is wrapped to the public key of
//! a security token and can only be recovered by asking that token for an
//! ECDH agreement.
//!
//! ## Quick Start
//!
//! ```rust
//! use ciphernaut::{Device, SoftwareDevice, Vault};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("secrets.vault");
//! let device = SoftwareDevice::generate();
//!
//! let mut vault = Vault::open(&path, Some(device.public_key().unwrap())).unwrap();
//! vault.create("db-password", b"s3cr3t").unwrap();
//! vault.close().unwrap();
//!
//! let vault = Vault::open(&path, None).unwrap();
//! let key = vault.get("db-password").unwrap();
//! assert_eq!(key.unwrap(&device).unwrap().as_slice(), b"s3cr3t");
//! ```
//!
//! ## Protocol
//!
//! - **Wrap**: fresh ephemeral P-256 key, ECDH with the vault key,
//!   HKDF-SHA256 to a 256-bit KEK, PKCS7 padding, AES key wrap (RFC 3394)
//! - **Unwrap**: the token performs the ECDH; the rest runs on the host
//! - **Container**: DER `SEQUENCE { public key, store }` in a single file
//!
//! ## What's NOT Provided
//!
//! - Reader discovery or a PC/SC transport (bring a [`CardChannel`])
//! - Authenticated binding between the container's key and its store
//! - Concurrent access to one container file

#![deny(unsafe_code)]

pub mod config;
pub mod container;
pub mod device;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keywrap;
pub mod store;
pub mod tlv;
pub mod vault;

pub use config::{PivConfig, VaultConfig};
pub use device::{CardChannel, Device, PivDevice, SoftwareDevice};
pub use envelope::{wrap, wrap_with_rng, VaultKey};
pub use error::{Result, VaultError};
pub use vault::Vault;

pub use p256;
pub use p256::{PublicKey, SecretKey};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
