#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = ciphernaut::container::inspect(data);
    if let Ok((public_key, blob)) = ciphernaut::container::decode(data) {
        if let Ok(store) = ciphernaut::store::KeyStore::from_bytes(&blob, public_key) {
            for reference in store.references() {
                let _ = store.get(&reference);
            }
        }
    }
});
