// Key store tests: the network key must be stable across calls and restarts

use lanledger::keystore::{FileKeyStore, KeyStore, StaticKeyStore};
use tempfile::TempDir;
use zeroize::Zeroizing;

#[tokio::test]
async fn test_plain_key_file_is_stable() {
    println!("🧪 Testing unsealed key file...");
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("keys").join("network.key");

    let first = FileKeyStore::new(&path, None).get_or_create_key().expect("create");
    assert!(path.exists(), "key file written on first use");
    let text = std::fs::read_to_string(&path).expect("read");
    assert_eq!(text, hex::encode(first));

    let store = FileKeyStore::new(&path, None);
    assert_eq!(store.get_or_create_key().expect("load"), first);
    assert_eq!(store.get_or_create_key().expect("cached"), first);
    println!("  ✅ Same key on every call and after reopening");
}

#[tokio::test]
async fn test_sealed_key_file_needs_the_passphrase() {
    println!("🧪 Testing sealed key file...");
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("network.key");
    let pass = || Some(Zeroizing::new("correct horse".to_string()));

    let key = FileKeyStore::new(&path, pass()).get_or_create_key().expect("create");
    let raw = std::fs::read(&path).expect("read");
    assert_eq!(raw[0], 1, "sealed files carry a version byte");
    assert!(!raw.windows(32).any(|w| w == key), "raw key must not appear in the file");

    assert_eq!(FileKeyStore::new(&path, pass()).get_or_create_key().expect("unseal"), key);
    assert!(FileKeyStore::new(&path, None).get_or_create_key().is_err());
    assert!(FileKeyStore::new(&path, Some(Zeroizing::new("wrong".into()))).get_or_create_key().is_err());
    println!("  ✅ Only the right pass-phrase opens the key");
}

#[tokio::test]
async fn test_corrupt_key_file_is_an_error() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("network.key");
    std::fs::write(&path, "not a key").expect("write");
    assert!(FileKeyStore::new(&path, None).get_or_create_key().is_err());
}

#[tokio::test]
async fn test_static_key_store() {
    let hex_key = "11".repeat(32);
    let store = StaticKeyStore::from_hex(&hex_key).expect("parse");
    assert_eq!(store.get_or_create_key().expect("key"), [0x11u8; 32]);
    assert!(StaticKeyStore::from_hex("abcd").is_err());
}
