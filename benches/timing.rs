use std::hint::black_box;
use std::time::Instant;

use ciphernaut::store::KeyStore;
use ciphernaut::{wrap, Device, SoftwareDevice};

fn time_it<F: FnMut()>(label: &str, iters: usize, mut f: F) {
    // warmup
    for _ in 0..(iters / 10).max(10) {
        f();
    }

    let start = Instant::now();
    for _ in 0..iters {
        f();
    }
    let elapsed = start.elapsed();

    let per_iter = elapsed / (iters as u32);
    println!("{:<16} total={:?}  per_iter={:?}", label, elapsed, per_iter);
}

fn main() {
    let device = SoftwareDevice::generate();
    let wrong_device = SoftwareDevice::generate();
    let pk = device.public_key().unwrap();

    let material = vec![0x42u8; 32];
    let key = wrap("bench", &material, &pk).unwrap();

    let mut store = KeyStore::new(pk.clone()).unwrap();
    for i in 0..100 {
        store.insert(&wrap(format!("key-{}", i), &material, &pk).unwrap()).unwrap();
    }
    let blob = store.to_bytes().unwrap();

    let iters = 2_000;

    time_it("wrap", iters, || {
        let k = wrap("bench", black_box(&material), black_box(&pk)).unwrap();
        black_box(k);
    });

    // Valid and wrong-device unwraps should cost about the same.
    time_it("unwrap", iters, || {
        let m = key.unwrap(black_box(&device)).unwrap();
        black_box(m);
    });

    time_it("wrong_device", iters, || {
        let r = key.unwrap(black_box(&wrong_device));
        black_box(r.err());
    });

    time_it("load_store_100", iters / 10, || {
        let s = KeyStore::from_bytes(black_box(&blob), pk.clone()).unwrap();
        black_box(s.get("key-99").unwrap());
    });

    println!("\nDone.");
}
