//! Device capability: the private-key half of the envelope protocol.
//!
//! A `Device` holds (or fronts) the vault's private key and performs ECDH on
//! request. Only the shared secret ever leaves it. Two implementations:
//!
//! - [`SoftwareDevice`]: in-memory P-256 key, always unlocked (tests, demos)
//! - [`PivDevice`]: a PIV token reached through a [`CardChannel`]

use p256::{PublicKey, SecretKey};
use zeroize::Zeroizing;

use crate::error::Result;

pub mod piv;
pub mod software;

pub use piv::{CardChannel, PivDevice};
pub use software::SoftwareDevice;

/// Raw ECDH output size (P-256 x-coordinate).
pub const SHARED_SECRET_BYTES: usize = 32;

/// ECDH shared secret, wiped on drop.
pub type SharedSecret = Zeroizing<[u8; SHARED_SECRET_BYTES]>;

pub trait Device {
    /// True until a successful [`Device::unlock`].
    fn is_locked(&self) -> bool;

    /// Present a PIN. `Ok(false)` means the PIN was rejected.
    fn unlock(&mut self, pin: &[u8]) -> Result<bool>;

    /// Public half of the device key; vaults bound to this device use it.
    fn public_key(&self) -> Result<PublicKey>;

    /// ECDH between the device private key and `peer`.
    fn key_agreement(&self, peer: &PublicKey) -> Result<SharedSecret>;
}

impl<D: Device + ?Sized> Device for &mut D {
    fn is_locked(&self) -> bool {
        (**self).is_locked()
    }

    fn unlock(&mut self, pin: &[u8]) -> Result<bool> {
        (**self).unlock(pin)
    }

    fn public_key(&self) -> Result<PublicKey> {
        (**self).public_key()
    }

    fn key_agreement(&self, peer: &PublicKey) -> Result<SharedSecret> {
        (**self).key_agreement(peer)
    }
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn is_locked(&self) -> bool {
        (**self).is_locked()
    }

    fn unlock(&mut self, pin: &[u8]) -> Result<bool> {
        (**self).unlock(pin)
    }

    fn public_key(&self) -> Result<PublicKey> {
        (**self).public_key()
    }

    fn key_agreement(&self, peer: &PublicKey) -> Result<SharedSecret> {
        (**self).key_agreement(peer)
    }
}

/// Static-key ECDH on P-256, returning the raw x-coordinate.
pub fn agree(secret: &SecretKey, peer: &PublicKey) -> SharedSecret {
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let mut out = Zeroizing::new([0u8; SHARED_SECRET_BYTES]);
    out.copy_from_slice(shared.raw_secret_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn agreement_is_symmetric() {
        for _ in 0..8 {
            let a = SecretKey::random(&mut OsRng);
            let b = SecretKey::random(&mut OsRng);
            let ab = agree(&a, &b.public_key());
            let ba = agree(&b, &a.public_key());
            assert_eq!(*ab, *ba);
        }
    }

    #[test]
    fn distinct_peers_give_distinct_secrets() {
        let a = SecretKey::random(&mut OsRng);
        let b = SecretKey::random(&mut OsRng);
        let c = SecretKey::random(&mut OsRng);
        assert_ne!(*agree(&a, &b.public_key()), *agree(&a, &c.public_key()));
    }

    #[test]
    fn boxed_device_forwards() {
        let mut device: Box<dyn Device> = Box::new(SoftwareDevice::generate());
        assert!(!device.is_locked());
        assert!(device.unlock(b"anything").unwrap());
        let pk = device.public_key().unwrap();
        let peer = SecretKey::random(&mut OsRng);
        assert_eq!(
            *device.key_agreement(&peer.public_key()).unwrap(),
            *agree(&peer, &pk)
        );
    }
}
