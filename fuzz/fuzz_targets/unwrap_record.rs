#![no_main]

use ciphernaut::store::KeyStore;
use ciphernaut::{Device, SoftwareDevice};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static DEVICE: Lazy<SoftwareDevice> = Lazy::new(SoftwareDevice::generate);

// Arbitrary wrapped bytes and ephemeral point fed through a store record.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let split = (data[0] as usize) % data.len();
    let (point, wrapped) = data[1..].split_at(split.min(data.len() - 1));

    let blob = format!(
        r#"{{"version":1,"collections":{{"keys":{{"documents":[{{"key_reference":"f","wrapped_key_hex":"{}","ephemeral_public_key_hex":"{}"}}]}}}}}}"#,
        hex::encode(wrapped),
        hex::encode(point),
    );

    let Ok(public_key) = DEVICE.public_key() else { return };
    let Ok(store) = KeyStore::from_bytes(blob.as_bytes(), public_key) else { return };
    if let Ok(key) = store.get("f") {
        let _ = key.unwrap(&*DEVICE);
    }
});

