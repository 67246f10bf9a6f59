//! Key wrap: PKCS7 padding + AES-256 key wrap (RFC 3394)

use aes_kw::KekAes256;
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::kdf::KEK_BYTES;

/// Padding block size (AES block).
pub const BLOCK_BYTES: usize = 16;

/// RFC 3394 integrity check value prepended to every wrapped buffer.
pub const SEMIBLOCK_BYTES: usize = 8;

/// PKCS7-pad `material` to a multiple of `BLOCK_BYTES`.
///
/// Aligned input gets a full extra block, so the result is never the
/// unpadded input.
pub fn pad(material: &[u8]) -> Zeroizing<Vec<u8>> {
    let pad_len = BLOCK_BYTES - (material.len() % BLOCK_BYTES);
    let mut out = Zeroizing::new(Vec::with_capacity(material.len() + pad_len));
    out.extend_from_slice(material);
    out.resize(material.len() + pad_len, pad_len as u8);
    out
}

/// Strip PKCS7 padding; the last byte gives the pad length.
pub fn unpad(padded: &[u8]) -> Result<&[u8]> {
    if padded.is_empty() || padded.len() % BLOCK_BYTES != 0 {
        return Err(VaultError::CryptoFailure("invalid padding"));
    }
    let pad_len = padded[padded.len() - 1] as usize;
    if pad_len == 0 || pad_len > BLOCK_BYTES {
        return Err(VaultError::CryptoFailure("invalid padding"));
    }

    let (body, tail) = padded.split_at(padded.len() - pad_len);
    let uniform = tail
        .iter()
        .fold(Choice::from(1), |acc, b| acc & b.ct_eq(&(pad_len as u8)));
    if !bool::from(uniform) {
        return Err(VaultError::CryptoFailure("invalid padding"));
    }
    Ok(body)
}

/// Pad and wrap `material` under `kek`.
pub fn wrap(kek: &[u8; KEK_BYTES], material: &[u8]) -> Result<Vec<u8>> {
    let kw = KekAes256::try_from(&kek[..])
        .map_err(|_| VaultError::CryptoFailure("invalid key-encryption key"))?;
    let padded = pad(material);
    let wrapped = kw
        .wrap_vec(&padded)
        .map_err(|_| VaultError::CryptoFailure("key wrap failed"))?;

    if wrapped.len() != padded.len() + SEMIBLOCK_BYTES {
        return Err(VaultError::CryptoFailure("wrapped key material is empty or invalid"));
    }
    Ok(wrapped)
}

/// Unwrap `wrapped` under `kek` and strip the padding.
pub fn unwrap(kek: &[u8; KEK_BYTES], wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let out_len = wrapped
        .len()
        .checked_sub(SEMIBLOCK_BYTES)
        .filter(|n| *n >= BLOCK_BYTES && n % BLOCK_BYTES == 0)
        .ok_or(VaultError::CryptoFailure("wrapped key material has invalid length"))?;

    let kw = KekAes256::try_from(&kek[..])
        .map_err(|_| VaultError::CryptoFailure("invalid key-encryption key"))?;
    let mut padded = Zeroizing::new(vec![0u8; out_len]);
    kw.unwrap(wrapped, &mut padded)
        .map_err(|_| VaultError::CryptoFailure("key unwrap failed"))?;

    Ok(Zeroizing::new(unpad(&padded)?.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEK: [u8; 32] = [0x11; 32];

    #[test]
    fn pad_adds_full_block_when_aligned() {
        assert_eq!(pad(&[]).as_slice(), &[16u8; 16]);
        let p = pad(&[0u8; 16]);
        assert_eq!(p.len(), 32);
        assert!(p[16..].iter().all(|&b| b == 16));
    }

    #[test]
    fn pad_partial_block() {
        let p = pad(b"abcd");
        assert_eq!(p.len(), 16);
        assert_eq!(&p[..4], b"abcd");
        assert!(p[4..].iter().all(|&b| b == 12));
    }

    #[test]
    fn unpad_rejects_bad_padding() {
        let mut p = pad(b"abcd").to_vec();
        p[10] ^= 0x01;
        assert!(unpad(&p).is_err());

        let mut zero = vec![0u8; 16];
        zero[15] = 0;
        assert!(unpad(&zero).is_err());

        let mut big = vec![0u8; 16];
        big[15] = 17;
        assert!(unpad(&big).is_err());

        assert!(unpad(&[]).is_err());
        assert!(unpad(&[1u8; 15]).is_err());
    }

    #[test]
    fn rfc3394_vector_256_bit_kek() {
        // RFC 3394 4.6: 256-bit key data with a 256-bit KEK.
        let kek: [u8; 32] =
            hex::decode("000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F")
                .unwrap()
                .try_into()
                .unwrap();
        let data =
            hex::decode("00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F").unwrap();
        let expected = hex::decode(
            "28C9F404C4B810F4CBCCB35CFB87F8263F5786E2D80ED326CBC7F0E71A99F43BFB988B9B7A02DD21",
        )
        .unwrap();

        let kw = KekAes256::try_from(&kek[..]).unwrap();
        assert_eq!(kw.wrap_vec(&data).unwrap(), expected);
    }

    #[test]
    fn wrap_unwrap() {
        let wrapped = wrap(&KEK, b"odd").unwrap();
        assert_eq!(wrapped.len(), 16 + SEMIBLOCK_BYTES);
        assert_eq!(unwrap(&KEK, &wrapped).unwrap().as_slice(), b"odd");
    }

    #[test]
    fn wrong_kek_fails_integrity_check() {
        let wrapped = wrap(&KEK, b"material").unwrap();
        let err = unwrap(&[0x22; 32], &wrapped).unwrap_err();
        assert!(matches!(err, VaultError::CryptoFailure(_)));
    }

    #[test]
    fn short_input_rejected() {
        assert!(unwrap(&KEK, &[]).is_err());
        assert!(unwrap(&KEK, &[0u8; 16]).is_err());
        assert!(unwrap(&KEK, &[0u8; 30]).is_err());
    }
}
