//! KDF (store format v1)
//!
//! info = PROTOCOL_ID || b"|kek|" || WRAP_ALGORITHM_ID
//! kek  = HKDF-SHA256(shared_secret, salt=None, info=info, len=32)
//!
//! The derivation is part of the persisted format: changing it makes every
//! existing wrapped key unrecoverable, so it is tied to `STORE_FORMAT_VERSION`.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Protocol identifier for KDF domain separation.
pub const PROTOCOL_ID: &[u8] = b"ciphernaut-vault-v1";

/// Dotted OID of id-aes256-wrap (RFC 3394 with a 256-bit KEK).
pub const WRAP_ALGORITHM_ID: &[u8] = b"2.16.840.1.101.3.4.1.45";

pub const KEK_BYTES: usize = 32;

pub fn derive_kek(shared_secret: &[u8]) -> Result<Zeroizing<[u8; KEK_BYTES]>> {
    let mut info = Vec::with_capacity(PROTOCOL_ID.len() + 5 + WRAP_ALGORITHM_ID.len());
    info.extend_from_slice(PROTOCOL_ID);
    info.extend_from_slice(b"|kek|");
    info.extend_from_slice(WRAP_ALGORITHM_ID);

    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut out = Zeroizing::new([0u8; KEK_BYTES]);
    hk.expand(&info, &mut out[..])
        .map_err(|_| VaultError::CryptoFailure("kek derivation failed"))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_per_secret() {
        let a = derive_kek(&[7u8; 32]).unwrap();
        let b = derive_kek(&[7u8; 32]).unwrap();
        let c = derive_kek(&[8u8; 32]).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn not_the_raw_secret() {
        let secret = [0x42u8; 32];
        assert_ne!(*derive_kek(&secret).unwrap(), secret);
    }
}
