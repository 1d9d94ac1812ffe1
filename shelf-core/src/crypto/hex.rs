use crate::error::{CacheError, Result};

pub fn parse_hex_array<const N: usize>(hex_str: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| CacheError::Format(format!("invalid hex: {e}")))?;
    if bytes.len() != N {
        return Err(CacheError::Format(format!(
            "expected {N} bytes ({} hex chars), got {}",
            N * 2,
            bytes.len()
        )));
    }
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// First 8 bytes of a digest, for log lines and listings.
pub fn short(digest: &[u8; 32]) -> String {
    hex::encode(&digest[..8])
}
