use crate::crypto::{self, SharedKey, KEY_LEN};
use anyhow::{anyhow, bail, Context, Result};
use argon2::{Argon2, Params};
use chacha20poly1305::aead::{Aead, NewAead};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use once_cell::sync::OnceCell;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const KEYFILE_VERSION_SEALED: u8 = 1;
// Tunable KDF parameters for sealing the key file
const KEYFILE_KDF_MEM_KIB: u32 = 64 * 1024;
const KEYFILE_KDF_TIME_COST: u32 = 3;

/// Source of the network key shared by every peer in the trust domain.
pub trait KeyStore: Send + Sync {
    /// Returns the same key on every call and across restarts, creating it
    /// on first use.
    fn get_or_create_key(&self) -> Result<SharedKey>;
}

/// A key supplied explicitly, e.g. through configuration.
pub struct StaticKeyStore(Zeroizing<SharedKey>);

impl StaticKeyStore {
    pub fn new(key: SharedKey) -> Self {
        Self(Zeroizing::new(key))
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        Ok(Self::new(crypto::key_from_hex(text)?))
    }
}

impl KeyStore for StaticKeyStore {
    fn get_or_create_key(&self) -> Result<SharedKey> {
        Ok(*self.0)
    }
}

/// Key persisted in a file. Stored as hex text, or sealed under an
/// Argon2id-derived key when a pass-phrase is given.
pub struct FileKeyStore {
    path: PathBuf,
    passphrase: Option<Zeroizing<String>>,
    cached: OnceCell<Zeroizing<SharedKey>>,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>, passphrase: Option<Zeroizing<String>>) -> Self {
        Self { path: path.into(), passphrase, cached: OnceCell::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_or_create(&self) -> Result<Zeroizing<SharedKey>> {
        if self.path.exists() {
            let raw = fs::read(&self.path)
                .with_context(|| format!("couldn't read key file {}", self.path.display()))?;
            return self.decode(&raw).map(Zeroizing::new);
        }

        let key = Zeroizing::new(crypto::generate_key());
        let encoded = match &self.passphrase {
            Some(pass) => seal(&key, pass)?,
            None => hex::encode(*key).into_bytes(),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("couldn't create key directory {}", parent.display()))?;
        }
        fs::write(&self.path, encoded)
            .with_context(|| format!("couldn't write key file {}", self.path.display()))?;
        restrict_permissions(&self.path);
        tracing::info!("🔑 Created network key at {}", self.path.display());
        Ok(key)
    }

    fn decode(&self, raw: &[u8]) -> Result<SharedKey> {
        if raw.first() == Some(&KEYFILE_VERSION_SEALED) {
            let pass = self
                .passphrase
                .as_ref()
                .ok_or_else(|| anyhow!("key file {} is sealed; a pass-phrase is required", self.path.display()))?;
            return unseal(raw, pass);
        }
        let text = std::str::from_utf8(raw).map_err(|_| anyhow!("key file is neither hex nor sealed"))?;
        crypto::key_from_hex(text)
    }
}

impl KeyStore for FileKeyStore {
    fn get_or_create_key(&self) -> Result<SharedKey> {
        let key = self.cached.get_or_try_init(|| self.load_or_create())?;
        Ok(**key)
    }
}

fn derive_sealing_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    let params = Params::new(KEYFILE_KDF_MEM_KIB, KEYFILE_KDF_TIME_COST, 1, None)
        .map_err(|e| anyhow!("Invalid Argon2id params: {}", e))?;
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| anyhow!("Argon2id key derivation failed: {}", e))?;
    Ok(key)
}

/// `[version][salt][nonce][ciphertext]`
fn seal(key: &SharedKey, passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealing_key = derive_sealing_key(passphrase, &salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&sealing_key[..]));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), &key[..])
        .map_err(|e| anyhow!("Failed to seal network key: {}", e))?;

    let mut out = Vec::with_capacity(1 + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.push(KEYFILE_VERSION_SEALED);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn unseal(raw: &[u8], passphrase: &str) -> Result<SharedKey> {
    let salt_start = 1;
    let nonce_start = salt_start + SALT_LEN;
    let ct_start = nonce_start + NONCE_LEN;
    if raw.len() <= ct_start {
        bail!("sealed key file is truncated");
    }
    let salt = &raw[salt_start..nonce_start];
    let nonce = &raw[nonce_start..ct_start];
    let ciphertext = &raw[ct_start..];

    let sealing_key = derive_sealing_key(passphrase, salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&sealing_key[..]));
    let plain = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("Failed to unseal network key (wrong pass-phrase?)"))?,
    );
    let key: SharedKey = plain
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("sealed key has length {}, expected {}", plain.len(), KEY_LEN))?;
    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("could not restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Obtain the key-file pass-phrase. Source order:
///   1) LANLEDGER_PASSPHRASE env var
///   2) Interactive prompt when stdin is a terminal and `prompt` is set
/// Otherwise the key file is stored unsealed.
pub fn obtain_passphrase(prompt: Option<&str>) -> Result<Option<Zeroizing<String>>> {
    if let Ok(val) = std::env::var("LANLEDGER_PASSPHRASE") {
        return Ok(Some(Zeroizing::new(val)));
    }
    match prompt {
        Some(text) if atty::is(atty::Stream::Stdin) => {
            let pw = rpassword::prompt_password(text).context("Failed to read pass-phrase")?;
            if pw.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Zeroizing::new(pw)))
            }
        }
        _ => Ok(None),
    }
}
