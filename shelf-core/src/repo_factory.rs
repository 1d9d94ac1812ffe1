use std::sync::Arc;

use crate::error::Result;
use crate::repo::{BlobStore, CatalogIndex, OpenParams, StorageEstimator};
use crate::repo_fs::{FsBlobStore, FsCatalog, FsEstimator};
use crate::repo_mem::{MemoryBlobStore, MemoryCatalog};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Fs,
    Memory,
}

/// The three storage primitives an `OfflineCache` is built from.
#[derive(Clone)]
pub struct StorageBackend {
    pub blobs: Arc<dyn BlobStore>,
    pub catalog: Arc<dyn CatalogIndex>,
    pub estimator: Arc<dyn StorageEstimator>,
}

impl StorageBackend {
    /// In-memory primitives; the blob store doubles as the quota estimator.
    pub fn memory(capacity: Option<u64>) -> Self {
        let blobs = Arc::new(MemoryBlobStore::new(capacity));
        Self {
            blobs: blobs.clone(),
            catalog: Arc::new(MemoryCatalog::new()),
            estimator: blobs,
        }
    }
}

pub fn open_backend(backend: Backend, p: &OpenParams) -> Result<StorageBackend> {
    match backend {
        Backend::Fs => {
            std::fs::create_dir_all(p.chapters_dir())?;
            let blobs = FsBlobStore::new(
                p.chapters_dir(),
                p.policy.codec,
                p.policy.zstd_level,
                p.aead_key.clone(),
            );
            let catalog = FsCatalog::open(&p.catalog_path(), p.policy.compact_after)?;
            Ok(StorageBackend {
                blobs: Arc::new(blobs),
                catalog: Arc::new(catalog),
                estimator: Arc::new(FsEstimator::new(&p.root, p.policy.quota_bytes)),
            })
        }
        Backend::Memory => Ok(StorageBackend::memory(p.policy.quota_bytes)),
    }
}
