//! CipherNaut CLI: hardware-bound secret vault
//!
//! Usage:
//!   ciphernaut keygen  --name <NAME>
//!   ciphernaut init    --vault <FILE> --pub <NAME>.pub
//!   ciphernaut store   --vault <FILE> --ref <REF> --in <FILE>
//!   ciphernaut fetch   --vault <FILE> --ref <REF> --key <NAME>.sec [--out <FILE>]
//!   ciphernaut list    --vault <FILE>
//!   ciphernaut inspect --vault <FILE>
//!
//! `--vault` falls back to $CIPHERNAUT_VAULT.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use ciphernaut::config::VAULT_PATH_ENV;
use ciphernaut::container;
use ciphernaut::p256::elliptic_curve::sec1::ToEncodedPoint;
use ciphernaut::store::KeyStore;
use ciphernaut::{PublicKey, SecretKey, SoftwareDevice, Vault, VaultConfig};
use rand_core::OsRng;

fn usage() -> ! {
    eprintln!(
        "CipherNaut: hardware-bound secret vault (P-256 ECDH + AES-256 key wrap)\n\
         \n\
         Commands:\n\
         \n\
         Generate a software key pair:\n\
         \n\
         ciphernaut keygen --name <NAME>\n\
         Writes <NAME>.pub (SEC1 point) and <NAME>.sec (32-byte scalar)\n\
         \n\
         Create an empty vault bound to a public key:\n\
         \n\
         ciphernaut init --vault <FILE> --pub <NAME>.pub\n\
         \n\
         Wrap a secret into the vault:\n\
         \n\
         ciphernaut store --vault <FILE> --ref <REF> --in <FILE>\n\
         \n\
         Recover a secret with a software key:\n\
         \n\
         ciphernaut fetch --vault <FILE> --ref <REF> --key <NAME>.sec [--out <FILE>]\n\
         Writes to stdout unless --out is given\n\
         \n\
         List references / show container metadata:\n\
         \n\
         ciphernaut list --vault <FILE>\n\
         ciphernaut inspect --vault <FILE>\n\
         \n\
         --vault defaults to ${}. Set RUST_LOG for logs, CIPHERNAUT_LOG_FORMAT=json for JSON.\n",
        VAULT_PATH_ENV
    );
    process::exit(1);
}

fn die(msg: &str) -> ! {
    eprintln!("error: {}", msg);
    process::exit(1);
}

fn init_tracing() {
    let log_format = std::env::var("CIPHERNAUT_LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ciphernaut=warn".into());
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn parse_args() -> (String, Vec<(String, String)>) {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let command = args[1].clone();
    let mut flags: Vec<(String, String)> = Vec::new();

    let mut i = 2;
    while i < args.len() {
        if args[i].starts_with("--") && i + 1 < args.len() {
            flags.push((args[i].clone(), args[i + 1].clone()));
            i += 2;
        } else {
            die(&format!("unexpected argument: {}", args[i]));
        }
    }

    (command, flags)
}

fn get_flag(flags: &[(String, String)], name: &str) -> Option<String> {
    flags.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

fn require_flag(flags: &[(String, String)], name: &str) -> String {
    get_flag(flags, name).unwrap_or_else(|| die(&format!("missing required flag: {}", name)))
}

fn vault_path(flags: &[(String, String)]) -> PathBuf {
    match get_flag(flags, "--vault") {
        Some(path) => PathBuf::from(path),
        None => VaultConfig::from_env()
            .map(|c| c.path)
            .unwrap_or_else(|| die(&format!("missing --vault and ${} is not set", VAULT_PATH_ENV))),
    }
}

/// Container contents without opening a writable handle.
fn load_store(path: &Path) -> KeyStore {
    let (public_key, blob) = container::read(path)
        .unwrap_or_else(|e| die(&format!("read {}: {}", path.display(), e)))
        .unwrap_or_else(|| die(&format!("no vault at {}", path.display())));
    KeyStore::from_bytes(&blob, public_key)
        .unwrap_or_else(|e| die(&format!("load {}: {}", path.display(), e)))
}

fn cmd_keygen(flags: &[(String, String)]) {
    let name = require_flag(flags, "--name");

    let sk = SecretKey::random(&mut OsRng);
    let pk = sk.public_key();
    let point = pk.to_encoded_point(false);
    let scalar = zeroize::Zeroizing::new(sk.to_bytes().to_vec());

    let pub_path = format!("{}.pub", name);
    let sec_path = format!("{}.sec", name);

    fs::write(&pub_path, point.as_bytes()).unwrap_or_else(|e| die(&format!("write {}: {}", pub_path, e)));
    fs::write(&sec_path, &*scalar).unwrap_or_else(|e| die(&format!("write {}: {}", sec_path, e)));

    eprintln!("keypair generated:");
    eprintln!("  public key:  {} ({} bytes)", pub_path, point.len());
    eprintln!("  secret key:  {} ({} bytes)", sec_path, scalar.len());
    eprintln!("  fingerprint: {}", container::fingerprint(&pk));
    eprintln!();
    eprintln!("keep {0} safe. share {1} freely.", sec_path, pub_path);
}

fn cmd_init(flags: &[(String, String)]) {
    let path = vault_path(flags);
    let pub_file = require_flag(flags, "--pub");

    if path.exists() {
        die(&format!("{} already exists", path.display()));
    }

    let pk_bytes = fs::read(&pub_file).unwrap_or_else(|e| die(&format!("read {}: {}", pub_file, e)));
    let pk = PublicKey::from_sec1_bytes(&pk_bytes).unwrap_or_else(|_| die("invalid public key file"));

    let vault = Vault::open(&path, Some(pk)).unwrap_or_else(|e| die(&e.to_string()));
    let fingerprint = container::fingerprint(vault.public_key());
    vault.close().unwrap_or_else(|e| die(&format!("write {}: {}", path.display(), e)));

    eprintln!("initialised {} (key {})", path.display(), fingerprint);
}

fn cmd_store(flags: &[(String, String)]) {
    let path = vault_path(flags);
    let reference = require_flag(flags, "--ref");
    let in_file = require_flag(flags, "--in");

    if !path.exists() {
        die(&format!("no vault at {} (run init first)", path.display()));
    }

    let material = zeroize::Zeroizing::new(
        fs::read(&in_file).unwrap_or_else(|e| die(&format!("read {}: {}", in_file, e))),
    );

    let mut vault = Vault::open(&path, None).unwrap_or_else(|e| die(&e.to_string()));
    let key = vault
        .create(&reference, &material)
        .unwrap_or_else(|e| die(&e.to_string()));
    let wrapped_len = key.wrapped_key_material().len();
    vault.close().unwrap_or_else(|e| die(&format!("write {}: {}", path.display(), e)));

    eprintln!(
        "stored {} as '{}' ({} bytes -> {} bytes wrapped)",
        in_file,
        reference,
        material.len(),
        wrapped_len
    );
}

fn cmd_fetch(flags: &[(String, String)]) {
    let path = vault_path(flags);
    let reference = require_flag(flags, "--ref");
    let key_file = require_flag(flags, "--key");
    let out_file = get_flag(flags, "--out");

    let sk_bytes = zeroize::Zeroizing::new(
        fs::read(&key_file).unwrap_or_else(|e| die(&format!("read {}: {}", key_file, e))),
    );
    let device = SoftwareDevice::from_bytes(&sk_bytes).unwrap_or_else(|e| die(&e.to_string()));

    let store = load_store(&path);
    let key = store.get(&reference).unwrap_or_else(|e| die(&e.to_string()));
    let material = key
        .unwrap(&device)
        .unwrap_or_else(|e| die(&format!("unwrap failed (wrong key or corrupted vault): {}", e)));

    match out_file {
        Some(out) => {
            fs::write(&out, material.as_slice()).unwrap_or_else(|e| die(&format!("write {}: {}", out, e)));
            eprintln!("fetched '{}' -> {} ({} bytes)", reference, out, material.len());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&material)
                .and_then(|_| stdout.flush())
                .unwrap_or_else(|e| die(&format!("write stdout: {}", e)));
        }
    }
}

fn cmd_list(flags: &[(String, String)]) {
    let path = vault_path(flags);
    for reference in load_store(&path).references() {
        println!("{}", reference);
    }
}

fn cmd_inspect(flags: &[(String, String)]) {
    let path = vault_path(flags);
    let data = fs::read(&path).unwrap_or_else(|e| die(&format!("read {}: {}", path.display(), e)));
    let info = container::inspect(&data).unwrap_or_else(|e| die(&e.to_string()));
    let store = load_store(&path);

    println!("CipherNaut Vault");
    println!("================");
    println!("Path:            {}", path.display());
    println!("Total size:      {} bytes", info.total_bytes);
    println!("Public key:      {} bytes{}", info.public_key_bytes, if info.compressed_point { " (compressed)" } else { "" });
    println!("Fingerprint:     {}", info.public_key_fingerprint);
    println!("Store payload:   {} bytes", info.store_bytes);
    println!("Keys:            {}", store.len());
}

fn main() {
    init_tracing();
    let (command, flags) = parse_args();

    match command.as_str() {
        "keygen" => cmd_keygen(&flags),
        "init" => cmd_init(&flags),
        "store" => cmd_store(&flags),
        "fetch" => cmd_fetch(&flags),
        "list" => cmd_list(&flags),
        "inspect" => cmd_inspect(&flags),
        "--version" | "-V" => println!("ciphernaut {}", ciphernaut::VERSION),
        _ => {
            eprintln!("unknown command: {}", command);
            usage();
        }
    }
}
