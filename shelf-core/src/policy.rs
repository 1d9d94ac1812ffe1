use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::CodecId;
use crate::error::{CacheError, Result};

pub const POLICY_FILE: &str = "shelf.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Ceiling for the whole cache domain. `None` means the environment reports no quota.
    pub quota_bytes: Option<u64>,
    pub codec: CodecId,
    pub zstd_level: i32,
    /// Rewrite the catalog journal after this many appended records; 0 disables.
    pub compact_after: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            quota_bytes: None,
            codec: CodecId::Zstd,
            zstd_level: 3,
            compact_after: 512,
        }
    }
}

impl Policy {
    /// Reads `shelf.json` from the cache root, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(POLICY_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CacheError::Format(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
