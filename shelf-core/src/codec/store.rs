use super::{CodecId, Compressor};
use crate::error::{CacheError, Result};

pub struct Store;

impl Compressor for Store {
    fn id(&self) -> CodecId {
        CodecId::Store
    }

    fn compress(&self, plain: &[u8], _level: i32) -> Result<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn decompress(&self, body: &[u8], plain_len: u64) -> Result<Vec<u8>> {
        if body.len() as u64 != plain_len {
            return Err(CacheError::Format(format!(
                "stored body is {} bytes, header says {plain_len}",
                body.len()
            )));
        }
        Ok(body.to_vec())
    }

    fn bound(&self, plain_len: u64) -> u64 {
        plain_len
    }
}
