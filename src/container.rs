//! Container format (on-disk vault)
//!
//! DER:
//!   SEQUENCE {
//!     OCTET STRING  public_key   -- SEC1 point, uncompressed on write
//!     OCTET STRING  store_blob   -- serialized key store
//!   }
//!
//! The pairing of the two fields is not authenticated: a substituted public
//! key is only noticed when unwraps start failing.

use std::fs;
use std::io;
use std::path::Path;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};
use crate::tlv;

pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_OCTET_STRING: u8 = 0x04;

/// SEC1 uncompressed P-256 point: 0x04 || x[32] || y[32].
pub const PUBLIC_KEY_BYTES: usize = 65;

/// Borrowed view of a parsed container.
#[derive(Debug, Clone, Copy)]
pub struct ContainerParts<'a> {
    pub public_key_bytes: &'a [u8],
    pub store_blob: &'a [u8],
}

pub fn decode_parts(data: &[u8]) -> Result<ContainerParts<'_>> {
    let (outer, trailing) = tlv::split_first(data)
        .ok_or_else(|| VaultError::Corrupt("container is not a DER sequence".into()))?;
    if outer.tag != TAG_SEQUENCE {
        return Err(VaultError::Corrupt(format!("expected SEQUENCE, found tag {:02X}", outer.tag)));
    }
    if !trailing.is_empty() {
        return Err(VaultError::Corrupt(format!("{} trailing bytes after container", trailing.len())));
    }

    let (first, rest) = tlv::split_first(outer.value)
        .ok_or_else(|| VaultError::Corrupt("missing public key field".into()))?;
    let (second, rest) = tlv::split_first(rest)
        .ok_or_else(|| VaultError::Corrupt("missing store field".into()))?;
    if first.tag != TAG_OCTET_STRING || second.tag != TAG_OCTET_STRING {
        return Err(VaultError::Corrupt("container fields must be OCTET STRINGs".into()));
    }
    if !rest.is_empty() {
        return Err(VaultError::Corrupt("unexpected extra container fields".into()));
    }

    Ok(ContainerParts {
        public_key_bytes: first.value,
        store_blob: second.value,
    })
}

/// Parse a container into the vault public key and the store blob.
pub fn decode(data: &[u8]) -> Result<(PublicKey, Vec<u8>)> {
    let parts = decode_parts(data)?;
    let public_key = PublicKey::from_sec1_bytes(parts.public_key_bytes)
        .map_err(|_| VaultError::Corrupt("public key is not a valid P-256 point".into()))?;
    Ok((public_key, parts.store_blob.to_vec()))
}

pub fn encode(public_key: &PublicKey, store_blob: &[u8]) -> Result<Vec<u8>> {
    let point = public_key.to_encoded_point(false);

    let mut body = Vec::with_capacity(
        tlv::tlv_size(point.len()) + tlv::tlv_size(store_blob.len()),
    );
    tlv::push_tlv(&mut body, TAG_OCTET_STRING, point.as_bytes())?;
    tlv::push_tlv(&mut body, TAG_OCTET_STRING, store_blob)?;
    tlv::encode(TAG_SEQUENCE, &body)
}

/// Read the container at `path`. `Ok(None)` if no file exists.
pub fn read(path: &Path) -> Result<Option<(PublicKey, Vec<u8>)>> {
    match fs::read(path) {
        Ok(data) => decode(&data).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write the container to `path`, replacing any existing file in place.
///
/// Not atomic: a failure mid-write can leave a truncated file behind.
pub fn write(path: &Path, public_key: &PublicKey, store_blob: &[u8]) -> Result<()> {
    let data = encode(public_key, store_blob)?;
    fs::write(path, &data)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Container metadata readable without a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub total_bytes: usize,
    pub public_key_bytes: usize,
    pub store_bytes: usize,
    pub compressed_point: bool,
    /// SHA-256 of the uncompressed point, hex.
    pub public_key_fingerprint: String,
}

pub fn fingerprint(public_key: &PublicKey) -> String {
    let point = public_key.to_encoded_point(false);
    hex::encode(Sha256::digest(point.as_bytes()))
}

pub fn inspect(data: &[u8]) -> Result<ContainerInfo> {
    let parts = decode_parts(data)?;
    let public_key = PublicKey::from_sec1_bytes(parts.public_key_bytes)
        .map_err(|_| VaultError::Corrupt("public key is not a valid P-256 point".into()))?;

    Ok(ContainerInfo {
        total_bytes: data.len(),
        public_key_bytes: parts.public_key_bytes.len(),
        store_bytes: parts.store_blob.len(),
        compressed_point: parts.public_key_bytes.len() != PUBLIC_KEY_BYTES,
        public_key_fingerprint: fingerprint(&public_key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey;
    use rand_core::OsRng;

    fn public_key() -> PublicKey {
        SecretKey::random(&mut OsRng).public_key()
    }

    #[test]
    fn layout_is_der_sequence_of_octet_strings() {
        let pk = public_key();
        let data = encode(&pk, b"store").unwrap();

        assert_eq!(data[0], TAG_SEQUENCE);
        // SEQUENCE len = (2 + 65) + (2 + 5) = 74
        assert_eq!(data[1], 74);
        assert_eq!(data[2], TAG_OCTET_STRING);
        assert_eq!(data[3], PUBLIC_KEY_BYTES as u8);
        assert_eq!(data[4], 0x04);
        assert_eq!(&data[data.len() - 7..], &[TAG_OCTET_STRING, 5, b's', b't', b'o', b'r', b'e']);
    }

    #[test]
    fn decode_returns_fields_byte_exact() {
        let pk = public_key();
        let blob = vec![0x5Au8; 1000];
        let (decoded_pk, decoded_blob) = decode(&encode(&pk, &blob).unwrap()).unwrap();
        assert_eq!(decoded_pk, pk);
        assert_eq!(decoded_blob, blob);
    }

    #[test]
    fn compressed_point_accepted() {
        let pk = public_key();
        let compressed = pk.to_encoded_point(true);
        let mut body = Vec::new();
        tlv::push_tlv(&mut body, TAG_OCTET_STRING, compressed.as_bytes()).unwrap();
        tlv::push_tlv(&mut body, TAG_OCTET_STRING, b"{}").unwrap();
        let data = tlv::encode(TAG_SEQUENCE, &body).unwrap();

        let (decoded, _) = decode(&data).unwrap();
        assert_eq!(decoded, pk);
        assert!(inspect(&data).unwrap().compressed_point);
    }

    #[test]
    fn malformed_containers_are_corrupt() {
        let pk = public_key();
        let good = encode(&pk, b"blob").unwrap();

        let truncated = &good[..good.len() - 1];
        let mut trailing = good.clone();
        trailing.push(0);
        let mut wrong_tag = good.clone();
        wrong_tag[0] = 0x31;
        let mut bad_point = good.clone();
        bad_point[4] = 0x07;

        let one_field = tlv::encode(TAG_SEQUENCE, &tlv::encode(TAG_OCTET_STRING, b"x").unwrap()).unwrap();

        for data in [
            truncated,
            &trailing[..],
            &wrong_tag[..],
            &bad_point[..],
            &one_field[..],
            &[][..],
        ] {
            assert!(matches!(decode(data), Err(VaultError::Corrupt(_))));
        }
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(&dir.path().join("absent.vault")).unwrap().is_none());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.vault");
        let pk = public_key();
        write(&path, &pk, b"payload").unwrap();
        let (read_pk, blob) = read(&path).unwrap().unwrap();
        assert_eq!(read_pk, pk);
        assert_eq!(blob, b"payload");
    }

    #[test]
    fn inspect_reports_sizes() {
        let pk = public_key();
        let data = encode(&pk, &[0u8; 300]).unwrap();
        let info = inspect(&data).unwrap();
        assert_eq!(info.total_bytes, data.len());
        assert_eq!(info.public_key_bytes, PUBLIC_KEY_BYTES);
        assert_eq!(info.store_bytes, 300);
        assert!(!info.compressed_point);
        assert_eq!(info.public_key_fingerprint, fingerprint(&pk));
        assert_eq!(info.public_key_fingerprint.len(), 64);
    }
}
