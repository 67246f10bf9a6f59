//! PIV token device (NIST SP 800-73-4).
//!
//! APDUs used (CLA 00, short Lc/Le):
//!   SELECT              00 A4 04 00  A0 00 00 03 08
//!   VERIFY              00 20 00 80  pin[8] (0xFF padded)
//!   GENERAL AUTHENTICATE 00 87 11 <slot>  7C { 82 00 || 85 <peer point> }
//!                       -> 7C { 82 <shared secret[32]> }
//!   GET METADATA        00 F7 00 <slot>  -> 04 { 86 <public point> } (YubiKey 5.3+)
//!   GET RESPONSE        00 C0 00 00 <le>  while SW1 = 61
//!
//! The reader transport sits behind [`CardChannel`]. Each exchange runs under
//! `PivConfig::timeout`; on expiry the call returns `Timeout` while the stuck
//! exchange keeps the channel until the token answers.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Instant;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{Device, SharedSecret, SHARED_SECRET_BYTES};
use crate::config::PivConfig;
use crate::error::{Result, VaultError};
use crate::tlv;

/// Raw command/response transport to one token (PC/SC or similar).
pub trait CardChannel: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send one command APDU and return the full response including SW1 SW2.
    fn transmit(&mut self, command: &[u8]) -> core::result::Result<Vec<u8>, Self::Error>;
}

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

pub const PIV_AID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x08];

const CLA: u8 = 0x00;
const INS_SELECT: u8 = 0xA4;
const INS_VERIFY: u8 = 0x20;
const INS_GENERAL_AUTHENTICATE: u8 = 0x87;
const INS_GET_RESPONSE: u8 = 0xC0;
const INS_GET_METADATA: u8 = 0xF7;

const P1_SELECT_BY_NAME: u8 = 0x04;
const PIN_REFERENCE: u8 = 0x80;
pub const ALGORITHM_ECCP256: u8 = 0x11;

pub const PIN_MAX_BYTES: usize = 8;
const PIN_PAD: u8 = 0xFF;

const TAG_DYNAMIC_AUTH: u8 = 0x7C;
const TAG_AUTH_RESPONSE: u8 = 0x82;
const TAG_AUTH_EXPONENTIATION: u8 = 0x85;
const TAG_METADATA_PUBLIC_KEY: u8 = 0x04;
const TAG_EC_POINT: u8 = 0x86;

pub const SW_SUCCESS: u16 = 0x9000;
const SW1_MORE_DATA: u8 = 0x61;

/// Upper bounds on one chained response (`61 xx` / GET RESPONSE).
pub const MAX_CHAINED_RESPONSES: usize = 64;
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;
const SW_VERIFY_FAILED_MASK: u16 = 0x63C0;
const SW_AUTH_BLOCKED: u16 = 0x6983;
const SW_SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;

// ---------------------------------------------------------------------------
// APDU helpers
// ---------------------------------------------------------------------------

fn command(ins: u8, p1: u8, p2: u8, data: &[u8], expect_data: bool) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() > 0xFF {
        return Err(VaultError::InvalidState("apdu data exceeds short length"));
    }
    let mut apdu = Zeroizing::new(Vec::with_capacity(4 + 1 + data.len() + 1));
    apdu.extend_from_slice(&[CLA, ins, p1, p2]);
    if !data.is_empty() {
        apdu.push(data.len() as u8);
        apdu.extend_from_slice(data);
    }
    if expect_data {
        apdu.push(0x00);
    }
    Ok(apdu)
}

struct Response {
    data: Zeroizing<Vec<u8>>,
    sw: u16,
}

fn split_status(raw: &[u8]) -> Result<(&[u8], u16)> {
    if raw.len() < 2 {
        return Err(VaultError::Device("response shorter than a status word".into()));
    }
    let (body, sw) = raw.split_at(raw.len() - 2);
    Ok((body, u16::from_be_bytes([sw[0], sw[1]])))
}

fn expect_success(sw: u16, what: &str) -> Result<()> {
    if sw == SW_SUCCESS {
        Ok(())
    } else {
        Err(VaultError::Device(format!("{} failed with status {:04X}", what, sw)))
    }
}

// ---------------------------------------------------------------------------
// PivDevice
// ---------------------------------------------------------------------------

/// PIV token reached through `C`. Locked until [`Device::unlock`] succeeds.
pub struct PivDevice<C: CardChannel> {
    channel: Arc<Mutex<C>>,
    config: PivConfig,
    locked: bool,
    public_key: OnceLock<PublicKey>,
}

impl<C: CardChannel> PivDevice<C> {
    /// Select the PIV application on `channel`.
    pub fn connect(channel: C, config: PivConfig) -> Result<Self> {
        let device = Self {
            channel: Arc::new(Mutex::new(channel)),
            config,
            locked: true,
            public_key: OnceLock::new(),
        };

        let resp = device.exchange(command(INS_SELECT, P1_SELECT_BY_NAME, 0x00, &PIV_AID, true)?)?;
        expect_success(resp.sw, "SELECT PIV")?;
        debug!(slot = format_args!("{:02X}", device.config.slot), "selected PIV application");
        Ok(device)
    }

    pub fn config(&self) -> &PivConfig {
        &self.config
    }

    /// One command, following `61 xx` with GET RESPONSE until done.
    ///
    /// `PivConfig::timeout` bounds the whole exchange, chained rounds
    /// included.
    fn exchange(&self, apdu: Zeroizing<Vec<u8>>) -> Result<Response> {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut raw = self.transmit(apdu, deadline)?;
        let mut data = Zeroizing::new(Vec::new());
        let mut rounds = 0usize;
        loop {
            let (body, sw) = split_status(&raw)?;
            if data.len() + body.len() > MAX_RESPONSE_BYTES {
                return Err(VaultError::Device(format!(
                    "response exceeds {} bytes",
                    MAX_RESPONSE_BYTES
                )));
            }
            data.extend_from_slice(body);
            if (sw >> 8) as u8 != SW1_MORE_DATA {
                return Ok(Response { data, sw });
            }

            rounds += 1;
            if rounds > MAX_CHAINED_RESPONSES {
                return Err(VaultError::Device(format!(
                    "token still chaining after {} GET RESPONSE rounds",
                    MAX_CHAINED_RESPONSES
                )));
            }
            let remaining = (sw & 0xFF) as u8;
            raw = self.transmit(
                Zeroizing::new(vec![CLA, INS_GET_RESPONSE, 0x00, 0x00, remaining]),
                deadline,
            )?;
        }
    }

    fn transmit(&self, apdu: Zeroizing<Vec<u8>>, deadline: Option<Instant>) -> Result<Zeroizing<Vec<u8>>> {
        let (Some(timeout), Some(deadline)) = (self.config.timeout, deadline) else {
            return transmit_locked(&self.channel, &apdu);
        };

        let budget = deadline.saturating_duration_since(Instant::now());
        if budget.is_zero() {
            warn!(?timeout, "token did not answer in time");
            return Err(VaultError::Timeout(timeout));
        }

        let channel = Arc::clone(&self.channel);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("ciphernaut-piv".into())
            .spawn(move || {
                let _ = tx.send(transmit_locked(&channel, &apdu));
            })?;

        match rx.recv_timeout(budget) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "token did not answer in time");
                Err(VaultError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(VaultError::Device(
                "card exchange ended without a response".into(),
            )),
        }
    }
}

fn transmit_locked<C: CardChannel>(channel: &Mutex<C>, apdu: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut channel = channel
        .lock()
        .map_err(|_| VaultError::Device("card channel poisoned by an earlier panic".into()))?;
    channel
        .transmit(apdu)
        .map(Zeroizing::new)
        .map_err(|e| VaultError::Channel(Box::new(e)))
}

impl<C: CardChannel> Device for PivDevice<C> {
    fn is_locked(&self) -> bool {
        self.locked
    }

    fn unlock(&mut self, pin: &[u8]) -> Result<bool> {
        if pin.len() > PIN_MAX_BYTES {
            warn!(len = pin.len(), "PIN longer than 8 bytes, not sent");
            return Ok(false);
        }

        let mut padded = Zeroizing::new([PIN_PAD; PIN_MAX_BYTES]);
        padded[..pin.len()].copy_from_slice(pin);
        let resp = self.exchange(command(INS_VERIFY, 0x00, PIN_REFERENCE, &padded[..], false)?)?;

        match resp.sw {
            SW_SUCCESS => {
                self.locked = false;
                info!("PIV token unlocked");
                Ok(true)
            }
            sw if sw & 0xFFF0 == SW_VERIFY_FAILED_MASK => {
                self.locked = true;
                warn!(retries_left = sw & 0x000F, "PIN rejected");
                Ok(false)
            }
            SW_AUTH_BLOCKED => {
                self.locked = true;
                warn!("PIN blocked");
                Ok(false)
            }
            sw => Err(VaultError::Device(format!("VERIFY failed with status {:04X}", sw))),
        }
    }

    fn public_key(&self) -> Result<PublicKey> {
        if let Some(pk) = self.public_key.get() {
            return Ok(pk.clone());
        }

        let resp = self.exchange(command(INS_GET_METADATA, 0x00, self.config.slot, &[], true)?)?;
        expect_success(resp.sw, "GET METADATA")?;

        let key = tlv::find(&resp.data, TAG_METADATA_PUBLIC_KEY)
            .ok_or_else(|| VaultError::Device("metadata carries no public key".into()))?;
        let point = tlv::find(key, TAG_EC_POINT)
            .ok_or_else(|| VaultError::Device("public key is not an EC point".into()))?;
        let pk = PublicKey::from_sec1_bytes(point)
            .map_err(|_| VaultError::Device("token returned an invalid P-256 point".into()))?;

        let _ = self.public_key.set(pk.clone());
        Ok(pk)
    }

    fn key_agreement(&self, peer: &PublicKey) -> Result<SharedSecret> {
        if self.locked {
            return Err(VaultError::Locked);
        }

        let point = peer.to_encoded_point(false);
        let mut inner = Vec::with_capacity(2 + tlv::tlv_size(point.len()));
        tlv::push_tlv(&mut inner, TAG_AUTH_RESPONSE, &[])?;
        tlv::push_tlv(&mut inner, TAG_AUTH_EXPONENTIATION, point.as_bytes())?;
        let template = tlv::encode(TAG_DYNAMIC_AUTH, &inner)?;

        let resp = self.exchange(command(
            INS_GENERAL_AUTHENTICATE,
            ALGORITHM_ECCP256,
            self.config.slot,
            &template,
            true,
        )?)?;
        match resp.sw {
            SW_SUCCESS => {}
            SW_SECURITY_STATUS_NOT_SATISFIED => return Err(VaultError::Locked),
            sw => expect_success(sw, "GENERAL AUTHENTICATE")?,
        }

        let secret = tlv::find(&resp.data, TAG_DYNAMIC_AUTH)
            .and_then(|body| tlv::find(body, TAG_AUTH_RESPONSE))
            .ok_or_else(|| VaultError::Device("malformed key agreement response".into()))?;
        if secret.len() != SHARED_SECRET_BYTES {
            return Err(VaultError::Device(format!(
                "shared secret is {} bytes, expected {}",
                secret.len(),
                SHARED_SECRET_BYTES
            )));
        }

        let mut out = Zeroizing::new([0u8; SHARED_SECRET_BYTES]);
        out.copy_from_slice(secret);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
