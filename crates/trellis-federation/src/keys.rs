//! Key store: this node's signing key and the public keys of its peers.
//!
//! Keys live as hex files under a single directory. Peer keys are named
//! `<mac>_public` with separators replaced; the local seed is `local.key`.
//! Every write goes through a temp file and a rename so a crash never leaves
//! a truncated key behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use trellis_types::normalize_mac;

const LOCAL_KEY_FILE: &str = "local.key";

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("invalid mac for key file: {0:?}")]
    InvalidMac(String),

    #[error("key store lock poisoned")]
    LockPoisoned,
}

/// Parses a hex-encoded Ed25519 public key.
pub fn parse_public_key(hex_key: &str) -> Result<VerifyingKey, KeyStoreError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| KeyStoreError::InvalidKey(format!("not hex: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| KeyStoreError::InvalidKey("expected 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| KeyStoreError::InvalidKey(e.to_string()))
}

/// SHA-256 fingerprint of a hex-encoded public key, as lowercase hex.
pub fn fingerprint(hex_key: &str) -> String {
    hex::encode(Sha256::digest(hex_key.trim().to_ascii_lowercase().as_bytes()))
}

/// File-backed key material.
#[derive(Debug)]
pub struct KeyStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    local: Mutex<Option<SigningKey>>,
}

impl KeyStore {
    /// Opens (and creates if missing) the key directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            local: Mutex::new(None),
        })
    }

    fn peer_key_path(&self, mac: &str) -> Result<PathBuf, KeyStoreError> {
        let mac = normalize_mac(mac);
        if mac.is_empty() {
            return Err(KeyStoreError::InvalidMac(mac));
        }
        let stem: String = mac
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Ok(self.dir.join(format!("{stem}_public")))
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), KeyStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| KeyStoreError::LockPoisoned)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| KeyStoreError::Io(e.error))?;
        Ok(())
    }

    /// Returns this node's signing key, generating and persisting one on
    /// first use.
    pub fn local_signing_key(&self) -> Result<SigningKey, KeyStoreError> {
        let mut cached = self.local.lock().map_err(|_| KeyStoreError::LockPoisoned)?;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let path = self.dir.join(LOCAL_KEY_FILE);
        let key = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let bytes = hex::decode(contents.trim())
                    .map_err(|e| KeyStoreError::InvalidKey(format!("local key: {e}")))?;
                let seed: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| KeyStoreError::InvalidKey("local key length".to_string()))?;
                SigningKey::from_bytes(&seed)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = SigningKey::generate(&mut OsRng);
                self.write_atomic(&path, &hex::encode(key.to_bytes()))?;
                tracing::info!(path = %path.display(), "generated local signing key");
                key
            }
            Err(e) => return Err(e.into()),
        };

        *cached = Some(key.clone());
        Ok(key)
    }

    /// Hex-encoded public half of the local signing key.
    pub fn local_public_key(&self) -> Result<String, KeyStoreError> {
        Ok(hex::encode(self.local_signing_key()?.verifying_key().to_bytes()))
    }

    /// Stores (or replaces) a peer's public key after validating it.
    pub fn put_peer_key(&self, mac: &str, hex_key: &str) -> Result<(), KeyStoreError> {
        parse_public_key(hex_key)?;
        let path = self.peer_key_path(mac)?;
        self.write_atomic(&path, &hex_key.trim().to_ascii_lowercase())?;
        tracing::debug!(mac, "stored peer public key");
        Ok(())
    }

    /// Reads a peer's public key, if one is stored.
    pub fn peer_key(&self, mac: &str) -> Result<Option<String>, KeyStoreError> {
        let path = self.peer_key_path(mac)?;
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a peer's public key. Returns `false` if none was stored.
    pub fn delete_peer_key(&self, mac: &str) -> Result<bool, KeyStoreError> {
        let path = self.peer_key_path(mac)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| KeyStoreError::LockPoisoned)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_public_hex() -> String {
        hex::encode(SigningKey::generate(&mut OsRng).verifying_key().to_bytes())
    }

    #[test]
    fn local_key_is_generated_once_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let first = KeyStore::open(dir.path()).unwrap().local_public_key().unwrap();
        let second = KeyStore::open(dir.path()).unwrap().local_public_key().unwrap();
        assert_eq!(first, second);
        assert!(dir.path().join(LOCAL_KEY_FILE).exists());
    }

    #[test]
    fn peer_key_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let key = random_public_hex();

        assert_eq!(store.peer_key("aa:bb").unwrap(), None);
        store.put_peer_key("AA:BB", &key).unwrap();
        assert_eq!(store.peer_key("aa:bb").unwrap(), Some(key.clone()));
        assert!(dir.path().join("aa_bb_public").exists());

        let replacement = random_public_hex();
        store.put_peer_key("aa:bb", &replacement).unwrap();
        assert_eq!(store.peer_key("aa:bb").unwrap(), Some(replacement));

        assert!(store.delete_peer_key("aa:bb").unwrap());
        assert!(!store.delete_peer_key("aa:bb").unwrap());
    }

    #[test]
    fn malformed_keys_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.put_peer_key("aa", "zz"),
            Err(KeyStoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.put_peer_key("aa", "abcd"),
            Err(KeyStoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.put_peer_key("  ", &random_public_hex()),
            Err(KeyStoreError::InvalidMac(_))
        ));
        assert_eq!(store.peer_key("aa").unwrap(), None);
    }

    #[test]
    fn fingerprint_ignores_case() {
        let key = random_public_hex();
        assert_eq!(fingerprint(&key), fingerprint(&key.to_ascii_uppercase()));
        assert_eq!(fingerprint(&key).len(), 64);
    }
}
