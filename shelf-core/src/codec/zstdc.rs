use std::io::Read;

use super::{CodecId, Compressor};
use crate::error::{CacheError, Result};

pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }

    fn compress(&self, plain: &[u8], level: i32) -> Result<Vec<u8>> {
        Ok(zstd::bulk::compress(plain, level.max(1))?)
    }

    fn decompress(&self, body: &[u8], plain_len: u64) -> Result<Vec<u8>> {
        // Output grows with what the frame really yields; the header length is
        // only trusted as a ceiling, never as an allocation size.
        let mut out = Vec::new();
        zstd::stream::read::Decoder::new(body)?
            .take(plain_len.saturating_add(1))
            .read_to_end(&mut out)?;
        if out.len() as u64 != plain_len {
            return Err(CacheError::Format(format!(
                "zstd frame decoded to {} bytes, header says {plain_len}",
                out.len()
            )));
        }
        Ok(out)
    }

    fn bound(&self, plain_len: u64) -> u64 {
        usize::try_from(plain_len)
            .map(|n| zstd::zstd_safe::compress_bound(n) as u64)
            .unwrap_or(u64::MAX)
    }
}
