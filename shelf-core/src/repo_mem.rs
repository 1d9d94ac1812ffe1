use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::container::journal::LogRecord;
use crate::domain::CatalogEntry;
use crate::error::{CacheError, Result};
use crate::index::inmem::InMemIndex;
use crate::repo::{BlobStore, CatalogIndex, StorageEstimate, StorageEstimator};
use crate::stats::Stats;

/// Process-local blob store. `capacity` acts as the environment's quota.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    capacity: Option<u64>,
    available: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new(capacity: Option<u64>) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            capacity,
            available: AtomicBool::new(true),
        }
    }

    /// Flip the primitive off to mimic storage the runtime refuses to provide.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::unavailable("blob store"))
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn put(&self, chapter_id: &str, payload: &[u8]) -> Result<()> {
        self.check()?;
        let mut blobs = self.blobs.lock().await;
        if let Some(cap) = self.capacity {
            let used: u64 = blobs
                .iter()
                .filter(|(k, _)| k.as_str() != chapter_id)
                .map(|(_, v)| v.len() as u64)
                .sum();
            if used + payload.len() as u64 > cap {
                return Err(std::io::Error::from(std::io::ErrorKind::StorageFull).into());
            }
        }
        blobs.insert(chapter_id.to_string(), payload.to_vec());
        Ok(())
    }

    async fn get(&self, chapter_id: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.blobs.lock().await.get(chapter_id).cloned())
    }

    async fn delete(&self, chapter_id: &str) -> Result<()> {
        self.check()?;
        self.blobs.lock().await.remove(chapter_id);
        Ok(())
    }

    async fn retain(&self, keep: &HashSet<String>) -> Result<u64> {
        self.check()?;
        let mut blobs = self.blobs.lock().await;
        let before = blobs.len();
        blobs.retain(|k, _| keep.contains(k));
        Ok((before - blobs.len()) as u64)
    }
}

#[async_trait]
impl StorageEstimator for MemoryBlobStore {
    async fn estimate(&self) -> Result<StorageEstimate> {
        self.check()?;
        let usage = self
            .blobs
            .lock()
            .await
            .values()
            .map(|v| v.len() as u64)
            .sum();
        Ok(StorageEstimate {
            usage,
            quota: self.capacity,
        })
    }
}

/// Process-local catalog sharing the journal's record semantics.
pub struct MemoryCatalog {
    index: Mutex<InMemIndex>,
    available: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            index: Mutex::new(InMemIndex::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::unavailable("catalog"))
        }
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogIndex for MemoryCatalog {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn contains(&self, chapter_id: &str) -> Result<bool> {
        self.check()?;
        Ok(self.index.lock().await.by_id.contains_key(chapter_id))
    }

    async fn upsert(&self, entry: CatalogEntry) -> Result<()> {
        self.check()?;
        self.index.lock().await.apply(&LogRecord::Upsert(entry));
        Ok(())
    }

    async fn remove(&self, chapter_id: &str) -> Result<()> {
        self.check()?;
        self.index.lock().await.apply(&LogRecord::Remove {
            chapter_id: chapter_id.to_string(),
        });
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CatalogEntry>> {
        self.check()?;
        Ok(self.index.lock().await.by_id.values().cloned().collect())
    }

    async fn get(&self, chapter_id: &str) -> Result<Option<CatalogEntry>> {
        self.check()?;
        Ok(self.index.lock().await.by_id.get(chapter_id).cloned())
    }

    async fn stats(&self) -> Result<Stats> {
        self.check()?;
        Ok(self.index.lock().await.stats.clone())
    }
}
