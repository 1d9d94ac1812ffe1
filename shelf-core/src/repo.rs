// shelf_core/src/repo.rs
use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::crypto::aead::AeadKey;
use crate::domain::CatalogEntry;
use crate::error::Result;
use crate::policy::Policy;
use crate::repo_factory::Backend;
use crate::stats::Stats;

#[derive(Clone, Debug)]
pub struct OpenParams {
    pub root: PathBuf,
    pub aead_key: Option<AeadKey>,
    pub policy: Policy,
    /// Also open the shell-asset precache beside the chapter cache.
    pub precache: bool,
    /// Where chapters live. `Memory` keeps nothing past the process and uses
    /// `policy.quota_bytes` as its capacity.
    pub backend: Backend,
}

impl OpenParams {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            aead_key: None,
            policy: Policy::default(),
            precache: true,
            backend: Backend::Fs,
        }
    }

    pub fn chapters_dir(&self) -> PathBuf {
        self.root.join("chapters")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("catalog.log")
    }

    pub fn precache_dir(&self) -> PathBuf {
        self.root.join("precache")
    }
}

/// Full chapter payloads keyed by chapter id.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether the persistent blob primitive exists right now. Must not mutate anything.
    fn is_available(&self) -> bool;

    /// All-or-nothing: on error no readable partial payload is left under `chapter_id`.
    async fn put(&self, chapter_id: &str, payload: &[u8]) -> Result<()>;

    async fn get(&self, chapter_id: &str) -> Result<Option<Vec<u8>>>;

    /// Worst-case storage a `put` of `payload_len` bytes takes, in the units
    /// the paired `StorageEstimator` reports.
    fn footprint(&self, payload_len: u64) -> u64 {
        payload_len
    }

    /// Storage currently taken by `chapter_id`, same units as [`BlobStore::footprint`].
    async fn stored_len(&self, chapter_id: &str) -> Result<Option<u64>> {
        Ok(self.get(chapter_id).await?.map(|p| p.len() as u64))
    }

    /// Idempotent.
    async fn delete(&self, chapter_id: &str) -> Result<()>;

    /// Drop every blob whose id is not in `keep`, plus leftovers of interrupted writes.
    /// Returns how many were removed.
    async fn retain(&self, keep: &HashSet<String>) -> Result<u64>;
}

/// Metadata ledger; the authority on whether a chapter is downloaded.
#[async_trait]
pub trait CatalogIndex: Send + Sync {
    fn is_available(&self) -> bool;

    async fn contains(&self, chapter_id: &str) -> Result<bool>;

    /// Fail-closed membership check: any read failure answers `false`.
    async fn has(&self, chapter_id: &str) -> bool {
        match self.contains(chapter_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(chapter_id, error = %e, "catalog read failed; reporting not downloaded");
                false
            }
        }
    }

    /// Overwrite by key.
    async fn upsert(&self, entry: CatalogEntry) -> Result<()>;

    /// Idempotent.
    async fn remove(&self, chapter_id: &str) -> Result<()>;

    /// Unordered.
    async fn list(&self) -> Result<Vec<CatalogEntry>>;

    async fn get(&self, chapter_id: &str) -> Result<Option<CatalogEntry>>;

    async fn stats(&self) -> Result<Stats>;

    /// Shrink the backing log to the live entries. No-op for stores without one.
    async fn compact(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageEstimate {
    pub usage: u64,
    /// `None` when the environment cannot report a ceiling.
    pub quota: Option<u64>,
}

#[async_trait]
pub trait StorageEstimator: Send + Sync {
    async fn estimate(&self) -> Result<StorageEstimate>;
}
