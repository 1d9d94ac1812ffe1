use std::io::{Read, Write};

use crate::codec::CodecId;
use crate::crypto::aead::{AeadKey, NONCE_LEN, TAG_LEN, fresh_nonce, open_whole, seal_whole};
use crate::error::{CacheError, Result};

pub const MAGIC: &[u8; 8] = b"SHLFBLB\0";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 8 + 1 + 1 + 1 + 1 + NONCE_LEN + 8 + 32 + 8;

const FLAG_AEAD: u8 = 0b0000_0001;

/// Fixed header in front of every stored chapter body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub codec: CodecId,
    pub sealed: bool,
    pub nonce: [u8; NONCE_LEN],
    /// Length of the payload before compression and sealing.
    pub plain_len: u64,
    /// BLAKE3 of the plain payload.
    pub digest: [u8; 32],
    pub body_len: u64,
}

impl BlobHeader {
    pub fn write_to(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&[VERSION])?;
        w.write_all(&[self.codec as u8])?;
        w.write_all(&[if self.sealed { FLAG_AEAD } else { 0 }])?;
        w.write_all(&[0u8])?; // reserved
        w.write_all(&self.nonce)?;
        w.write_all(&self.plain_len.to_le_bytes())?;
        w.write_all(&self.digest)?;
        w.write_all(&self.body_len.to_le_bytes())?;
        Ok(())
    }

    pub fn read_from(mut r: impl Read) -> Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(CacheError::Format("bad blob magic".into()));
        }
        let mut b4 = [0u8; 4];
        r.read_exact(&mut b4)?;
        let [version, codec, flags, _reserved] = b4;
        if version != VERSION {
            return Err(CacheError::Format(format!("unsupported blob version {version}")));
        }
        let mut nonce = [0u8; NONCE_LEN];
        r.read_exact(&mut nonce)?;
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let plain_len = u64::from_le_bytes(buf8);
        let mut digest = [0u8; 32];
        r.read_exact(&mut digest)?;
        r.read_exact(&mut buf8)?;
        let body_len = u64::from_le_bytes(buf8);
        Ok(Self {
            codec: CodecId::from_u8(codec)?,
            sealed: flags & FLAG_AEAD != 0,
            nonce,
            plain_len,
            digest,
            body_len,
        })
    }
}

/// Upper bound on the file size `encode` produces for `plain_len` payload bytes.
pub fn stored_bound(plain_len: u64, codec: CodecId, sealed: bool) -> u64 {
    let tag = if sealed { TAG_LEN as u64 } else { 0 };
    (HEADER_LEN as u64)
        .saturating_add(codec.compressor().bound(plain_len))
        .saturating_add(tag)
}

/// Compress then optionally seal `payload`. The chapter id is bound as associated data.
pub fn encode(
    chapter_id: &str,
    payload: &[u8],
    codec: CodecId,
    level: i32,
    key: Option<&AeadKey>,
) -> Result<(BlobHeader, Vec<u8>)> {
    let compressed = codec.compressor().compress(payload, level)?;
    let (sealed, nonce, body) = match key {
        Some(k) => {
            let nonce = fresh_nonce()?;
            let ad = associated_data(chapter_id, codec);
            (true, nonce, seal_whole(k, &nonce, &ad, &compressed)?)
        }
        None => (false, [0u8; NONCE_LEN], compressed),
    };
    let header = BlobHeader {
        codec,
        sealed,
        nonce,
        plain_len: payload.len() as u64,
        digest: *blake3::hash(payload).as_bytes(),
        body_len: body.len() as u64,
    };
    Ok((header, body))
}

/// Inverse of [`encode`]; the digest check rejects any body that does not
/// reproduce exactly what was written.
pub fn decode(
    chapter_id: &str,
    header: &BlobHeader,
    body: &[u8],
    key: Option<&AeadKey>,
) -> Result<Vec<u8>> {
    let compressed = if header.sealed {
        let k = key.ok_or_else(|| {
            CacheError::Format("blob is sealed; open the cache with its key".into())
        })?;
        open_whole(
            k,
            &header.nonce,
            &associated_data(chapter_id, header.codec),
            body,
        )?
    } else {
        body.to_vec()
    };
    let plain = header
        .codec
        .compressor()
        .decompress(&compressed, header.plain_len)?;
    if blake3::hash(&plain).as_bytes() != &header.digest {
        return Err(CacheError::Format(format!(
            "blob digest mismatch for chapter {chapter_id}"
        )));
    }
    Ok(plain)
}

fn associated_data(chapter_id: &str, codec: CodecId) -> Vec<u8> {
    let mut ad = Vec::with_capacity(chapter_id.len() + 9);
    ad.extend_from_slice(b"shelfblb");
    ad.push(codec as u8);
    ad.extend_from_slice(chapter_id.as_bytes());
    ad
}
