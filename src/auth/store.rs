use anyhow::{Context, Result};
use chacha20poly1305::{
    ChaCha20Poly1305, KeyInit, Nonce,
    aead::{Aead, OsRng, rand_core::RngCore},
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use super::Credential;
use crate::error::AuthError;

const KEY_FILE: &str = ".secret_key";
const NONCE_LEN: usize = 12;

/// Pluggable storage for the OAuth credential blob.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, AuthError>;
    fn save(&self, credential: &Credential) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// Encrypted-file credential store.
///
/// The credential is serialized to JSON and sealed with ChaCha20-Poly1305;
/// the key lives beside the blob in a 0600 file. Interchangeable with an OS
/// keychain behind the same trait.
pub struct EncryptedFileStore {
    path: PathBuf,
}

impl EncryptedFileStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn key_path(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(KEY_FILE)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut key_bytes = self.load_or_create_key()?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key_bytes).context("invalid key length")?;
        key_bytes.zeroize();

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    fn unseal(&self, combined: &[u8]) -> Result<Vec<u8>> {
        if combined.len() < NONCE_LEN {
            anyhow::bail!("credential blob too short");
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut key_bytes = self.load_or_create_key()?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key_bytes).context("invalid key length")?;
        key_bytes.zeroize();

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))
    }

    fn read_key_file(path: &Path) -> Result<Vec<u8>> {
        let hex_key = fs::read_to_string(path).context("failed to read key file")?;
        let key = hex::decode(hex_key.trim()).context("invalid hex in key file")?;
        if key.len() != 32 {
            anyhow::bail!("key file has invalid length (expected 32 bytes)");
        }
        Ok(key)
    }

    fn write_new_key_file(path: &Path, key: &[u8]) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)
                .context("failed to create key file")?;
            file.write_all(hex::encode(key).as_bytes())
                .context("failed to write key file")?;
            file.sync_all().context("failed to sync key file")?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, hex::encode(key)).context("failed to write key file")?;
        }

        Self::enforce_key_permissions(path)
    }

    fn enforce_key_permissions(path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .context("failed to set key file permissions")?;
        }
        Ok(())
    }

    fn load_or_create_key(&self) -> Result<Vec<u8>> {
        let path = self.key_path();
        if path.exists() {
            Self::enforce_key_permissions(&path)?;
            Self::read_key_file(&path)
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("failed to create credential directory")?;
            }
            let mut key = vec![0u8; 32];
            OsRng.fill_bytes(&mut key);
            match Self::write_new_key_file(&path, &key) {
                Ok(()) => Ok(key),
                Err(error) => {
                    let is_already_exists = error
                        .downcast_ref::<std::io::Error>()
                        .is_some_and(|io| io.kind() == std::io::ErrorKind::AlreadyExists);
                    if is_already_exists {
                        Self::enforce_key_permissions(&path)?;
                        Self::read_key_file(&path)
                    } else {
                        Err(error)
                    }
                }
            }
        }
    }
}

impl CredentialStore for EncryptedFileStore {
    fn load(&self) -> Result<Option<Credential>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let combined = fs::read(&self.path).map_err(|e| AuthError::Store(e.to_string()))?;
        let plaintext = self
            .unseal(&combined)
            .map_err(|e| AuthError::Store(format!("{e:#}")))?;
        let credential: Credential = serde_json::from_slice(&plaintext)
            .map_err(|e| AuthError::Store(format!("credential blob is not valid JSON: {e}")))?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        let plaintext = serde_json::to_vec(credential)
            .map_err(|e| AuthError::Store(format!("serialize: {e}")))?;
        let sealed = self
            .seal(&plaintext)
            .map_err(|e| AuthError::Store(format!("{e:#}")))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| AuthError::Store(e.to_string()))?;
        }
        fs::write(&self.path, sealed).map_err(|e| AuthError::Store(e.to_string()))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| AuthError::Store(e.to_string()))?;
        }
        Ok(())
    }
}
