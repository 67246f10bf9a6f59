//! BER-TLV helpers (single-byte tags, definite lengths).
//!
//! Length encoding:
//!   0x00..=0x7F          short form
//!   0x8N L1..LN          long form, N = 1..=4 length bytes (big-endian)
//!
//! Used by the DER container and the PIV APDU payloads. Indefinite lengths
//! (0x80) and lengths wider than 32 bits are rejected.

use crate::error::{Result, VaultError};

const MAX_LENGTH_BYTES: usize = 4;

/// Number of big-endian bytes needed for a long-form length.
#[inline]
fn long_form_bytes(len: usize) -> usize {
    let bits = usize::BITS - len.leading_zeros();
    ((bits + 7) / 8) as usize
}

/// Encoded size of a length field for `len`.
#[inline]
fn length_size(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        1 + long_form_bytes(len)
    }
}

/// Full encoded size of a TLV with a `v_len` byte value.
#[inline]
pub fn tlv_size(v_len: usize) -> usize {
    1 + length_size(v_len) + v_len
}

fn push_length(out: &mut Vec<u8>, len: usize) -> Result<()> {
    if len < 0x80 {
        out.push(len as u8);
        return Ok(());
    }
    let n = long_form_bytes(len);
    if n > MAX_LENGTH_BYTES {
        return Err(VaultError::InvalidState("tlv value too large"));
    }
    out.push(0x80 | n as u8);
    let be = (len as u64).to_be_bytes();
    out.extend_from_slice(&be[be.len() - n..]);
    Ok(())
}

/// Append `tag || length || value`.
pub fn push_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) -> Result<()> {
    out.push(tag);
    push_length(out, value.len())?;
    out.extend_from_slice(value);
    Ok(())
}

/// Build a standalone TLV.
pub fn encode(tag: u8, value: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(tlv_size(value.len()));
    push_tlv(&mut out, tag, value)?;
    Ok(out)
}

/// Borrowed view of one decoded TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

/// Split the first TLV off `data`, returning it and the remaining bytes.
pub fn split_first(data: &[u8]) -> Option<(Tlv<'_>, &[u8])> {
    let (&tag, rest) = data.split_first()?;
    let (&first, rest) = rest.split_first()?;

    let (len, rest) = if first < 0x80 {
        (first as usize, rest)
    } else {
        let n = (first & 0x7F) as usize;
        if n == 0 || n > MAX_LENGTH_BYTES || rest.len() < n {
            return None;
        }
        let (len_bytes, rest) = rest.split_at(n);
        let len = len_bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (len, rest)
    };

    if rest.len() < len {
        return None;
    }
    let (value, rest) = rest.split_at(len);
    Some((Tlv { tag, value }, rest))
}

/// Find the first TLV with `tag` among the siblings in `data`.
pub fn find(data: &[u8], tag: u8) -> Option<&[u8]> {
    let mut rest = data;
    while !rest.is_empty() {
        let (tlv, next) = split_first(rest)?;
        if tlv.tag == tag {
            return Some(tlv.value);
        }
        rest = next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form() {
        let enc = encode(0x04, b"abc").unwrap();
        assert_eq!(enc, [0x04, 0x03, b'a', b'b', b'c']);
        let (tlv, rest) = split_first(&enc).unwrap();
        assert_eq!(tlv.tag, 0x04);
        assert_eq!(tlv.value, b"abc");
        assert!(rest.is_empty());
    }

    #[test]
    fn long_forms() {
        let v = vec![0xAA; 200];
        let enc = encode(0x04, &v).unwrap();
        assert_eq!(&enc[..3], &[0x04, 0x81, 200]);
        assert_eq!(enc.len(), tlv_size(200));

        let v = vec![0xBB; 4000];
        let enc = encode(0x04, &v).unwrap();
        assert_eq!(&enc[..4], &[0x04, 0x82, 0x0F, 0xA0]);
        assert_eq!(split_first(&enc).unwrap().0.value.len(), 4000);
    }

    #[test]
    fn truncated_value_rejected() {
        assert!(split_first(&[0x04, 0x05, 1, 2]).is_none());
        assert!(split_first(&[0x04, 0x82, 0x01]).is_none());
        assert!(split_first(&[0x04]).is_none());
    }

    #[test]
    fn three_byte_length() {
        let v = vec![0xCC; 70_000];
        let enc = encode(0x04, &v).unwrap();
        assert_eq!(&enc[..5], &[0x04, 0x83, 0x01, 0x11, 0x70]);
        assert_eq!(enc.len(), tlv_size(70_000));
        assert_eq!(split_first(&enc).unwrap().0.value.len(), 70_000);
    }

    #[test]
    fn indefinite_and_wide_lengths_rejected() {
        assert!(split_first(&[0x30, 0x80, 0x00, 0x00]).is_none());
        assert!(split_first(&[0x30, 0x85, 0, 0, 0, 0, 1, 0]).is_none());
    }

    #[test]
    fn find_sibling() {
        let mut data = Vec::new();
        push_tlv(&mut data, 0x82, &[]).unwrap();
        push_tlv(&mut data, 0x85, &[1, 2, 3]).unwrap();
        assert_eq!(find(&data, 0x85), Some(&[1u8, 2, 3][..]));
        assert_eq!(find(&data, 0x82), Some(&[][..]));
        assert_eq!(find(&data, 0x99), None);
    }
}
