use anyhow::{anyhow, bail, Result};
use blake3::Hasher;
use chacha20poly1305::aead::{Aead, NewAead};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Length in bytes of the network-wide symmetric key.
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// The shared symmetric key every peer in the trust domain holds.
pub type SharedKey = [u8; KEY_LEN];

// Obfuscation layout: [u32 BE length][payload][16..79 random bytes], XOR-masked per index.
const OBFUSCATION_MASK: u8 = 0x5A;
const LENGTH_PREFIX: usize = 4;
const MIN_PADDING: u32 = 16;
const PADDING_SPREAD: u32 = 64;

/// Fresh random key material from the OS RNG.
pub fn generate_key() -> SharedKey {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Authenticated encryption; output is `nonce ‖ ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &SharedKey) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| anyhow!("encryption failure: {}", e))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt(ciphertext_with_nonce: &[u8], key: &SharedKey) -> Result<Vec<u8>> {
    if ciphertext_with_nonce.len() < NONCE_LEN {
        bail!("ciphertext too short ({} bytes)", ciphertext_with_nonce.len());
    }
    let (nonce, ciphertext) = ciphertext_with_nonce.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("decryption failure: {}", e))
}

fn mask(bytes: &mut [u8]) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b ^= OBFUSCATION_MASK ^ (i % 256) as u8;
    }
}

/// Length-prefix the payload, append random padding and mask every byte.
pub fn obfuscate(data: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(data.len()).map_err(|_| anyhow!("payload too large to obfuscate"))?;
    let mut rng = rand::thread_rng();
    let padding = (rng.gen::<u32>() % PADDING_SPREAD + MIN_PADDING) as usize;

    let mut out = Vec::with_capacity(LENGTH_PREFIX + data.len() + padding);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    let start = out.len();
    out.resize(start + padding, 0);
    rng.fill_bytes(&mut out[start..]);

    mask(&mut out);
    Ok(out)
}

/// Inverse of [`obfuscate`]; trailing padding is discarded.
pub fn deobfuscate(obfuscated: &[u8]) -> Result<Vec<u8>> {
    if obfuscated.len() < LENGTH_PREFIX {
        bail!("obfuscated frame shorter than its length prefix");
    }
    let mut bytes = obfuscated.to_vec();
    mask(&mut bytes);

    let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let end = LENGTH_PREFIX
        .checked_add(declared)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| anyhow!("declared length {} exceeds frame of {} bytes", declared, bytes.len()))?;
    Ok(bytes[LENGTH_PREFIX..end].to_vec())
}

/// Domain-separated BLAKE3 digest.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *Hasher::new_derive_key("lanledger-v1").update(data).finalize().as_bytes()
}

/// Digest carried in the `signature` field of a transfer. Peers never verify it.
pub fn transaction_digest(id: &str, from: &str, to: &str, amount: f64, timestamp: u64) -> String {
    let mut h = Hasher::new_derive_key("lanledger-transaction-v1");
    h.update(id.as_bytes());
    h.update(from.as_bytes());
    h.update(to.as_bytes());
    h.update(&amount.to_be_bytes());
    h.update(&timestamp.to_be_bytes());
    hex::encode(h.finalize().as_bytes())
}

/// Parse a 64-character hex string into key material.
pub fn key_from_hex(text: &str) -> Result<SharedKey> {
    let bytes = hex::decode(text.trim()).map_err(|e| anyhow!("invalid key hex: {}", e))?;
    let key: SharedKey = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("key must be {} bytes, got {}", KEY_LEN, bytes.len()))?;
    Ok(key)
}
