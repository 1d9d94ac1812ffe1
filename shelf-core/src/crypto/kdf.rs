use std::path::Path;

use argon2::Argon2;

use crate::crypto::aead::AeadKey;
use crate::error::{CacheError, Result};

pub const SALT_FILE: &str = "key.salt";
const SALT_LEN: usize = 16;

/// Argon2id (default params) over the passphrase and the per-cache salt.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<AeadKey> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CacheError::Format(format!("kdf: {e}")))?;
    Ok(AeadKey(key))
}

/// Salt lives beside the cache so the same passphrase reopens it.
pub fn load_or_create_salt(root: &Path) -> Result<[u8; SALT_LEN]> {
    let path = root.join(SALT_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => {
            let salt: [u8; SALT_LEN] = bytes.as_slice().try_into().map_err(|_| {
                CacheError::Format(format!("{}: expected {SALT_LEN} bytes", path.display()))
            })?;
            Ok(salt)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut salt = [0u8; SALT_LEN];
            getrandom::getrandom(&mut salt)
                .map_err(|e| CacheError::Io(std::io::Error::other(format!("getrandom: {e}"))))?;
            std::fs::create_dir_all(root)?;
            std::fs::write(&path, salt)?;
            Ok(salt)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn key_from_passphrase(root: &Path, passphrase: &str) -> Result<AeadKey> {
    let salt = load_or_create_salt(root)?;
    derive_key(passphrase, &salt)
}
