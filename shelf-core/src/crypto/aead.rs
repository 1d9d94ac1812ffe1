use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::error::{CacheError, Result};

pub const TAG_LEN: usize = 16;
pub const NONCE_LEN: usize = 24;

/// Raw 32-byte key for sealing chapter bodies at rest.
#[derive(Clone)]
pub struct AeadKey(pub [u8; 32]);

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadKey(..)")
    }
}

/// Fresh random nonce per write; overwrites of the same chapter never reuse one.
pub fn fresh_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut n = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut n)
        .map_err(|e| CacheError::Io(std::io::Error::other(format!("getrandom: {e}"))))?;
    Ok(n)
}

/// Seal a whole buffer; `ad` binds the ciphertext to its chapter key.
pub fn seal_whole(
    key: &AeadKey,
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let aead = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    aead.encrypt(
        XNonce::from_slice(nonce),
        Payload {
            msg: plaintext,
            aad: ad,
        },
    )
    .map_err(|_| CacheError::Format("aead encrypt failed".into()))
}

pub fn open_whole(
    key: &AeadKey,
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let aead = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    aead.decrypt(
        XNonce::from_slice(nonce),
        Payload {
            msg: ciphertext,
            aad: ad,
        },
    )
    .map_err(|_| CacheError::Format("aead decrypt failed (wrong key or tampered blob)".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn associated_data_is_bound() {
        let key = AeadKey([7u8; 32]);
        let nonce = fresh_nonce().unwrap();
        let ct = seal_whole(&key, &nonce, b"chapter-1", b"secret text").unwrap();
        assert_eq!(ct.len(), b"secret text".len() + TAG_LEN);
        assert_eq!(
            open_whole(&key, &nonce, b"chapter-1", &ct).unwrap(),
            b"secret text"
        );
        assert!(open_whole(&key, &nonce, b"chapter-2", &ct).is_err());
        assert!(open_whole(&AeadKey([8u8; 32]), &nonce, b"chapter-1", &ct).is_err());
    }
}
