use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    Store = 0,
    Zstd = 1,
}

impl CodecId {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(CodecId::Store),
            1 => Ok(CodecId::Zstd),
            other => Err(CacheError::Format(format!("unknown codec id {other}"))),
        }
    }

    pub fn compressor(self) -> &'static dyn Compressor {
        match self {
            CodecId::Store => &store::Store,
            CodecId::Zstd => &zstdc::ZstdCompressor,
        }
    }
}

impl FromStr for CodecId {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "store" | "none" => Ok(CodecId::Store),
            "zstd" => Ok(CodecId::Zstd),
            other => Err(CacheError::Format(format!("unknown codec {other:?}"))),
        }
    }
}

/// Whole-payload codec. Chapters are small enough that streaming buys nothing.
pub trait Compressor: Send + Sync {
    fn id(&self) -> CodecId;
    fn compress(&self, plain: &[u8], level: i32) -> Result<Vec<u8>>;
    fn decompress(&self, body: &[u8], plain_len: u64) -> Result<Vec<u8>>;
    /// Largest body `compress` can produce for `plain_len` input bytes.
    fn bound(&self, plain_len: u64) -> u64;
}

pub mod store;
pub mod zstdc;
