//! Download orchestration.
//!
//! [`OfflineCache`] is the only writer of the blob store and catalog pair.
//! A chapter counts as downloaded exactly when the catalog holds an entry for
//! it, so every write goes blob first, then catalog, and every removal goes
//! blob first, then catalog, all under a per-chapter lock.

pub mod locks;

use std::collections::HashSet;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor, Subscription};
use crate::domain::{CatalogEntry, ChapterContent, DownloadedChapter, StorageUsageSnapshot};
use crate::error::{CacheError, Result};
use crate::precache::PrecacheController;
use crate::probe::{Capabilities, CapabilityProbe};
use crate::quota::QuotaMonitor;
use crate::repo::{BlobStore, CatalogIndex, OpenParams};
use crate::repo_factory::{StorageBackend, open_backend};
use crate::stats::Stats;

use self::locks::KeyLocks;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VacuumReport {
    pub orphan_blobs: u64,
}

#[derive(Clone)]
pub struct OfflineCache {
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogIndex>,
    probe: CapabilityProbe,
    quota: QuotaMonitor,
    connectivity: ConnectivityMonitor,
    precache: Option<Arc<PrecacheController>>,
    locks: Arc<KeyLocks>,
    /// Held from the quota check until the catalog entry lands, so two
    /// writers never admit against the same stale estimate.
    admission: Arc<Mutex<()>>,
    /// Writers share it; maintenance that must not race a half-finished write takes it exclusively.
    gate: Arc<RwLock<()>>,
}

impl OfflineCache {
    /// `connectivity` should be seeded from the runtime, e.g. with
    /// [`ConnectivityMonitor::detect`].
    pub fn new(backend: StorageBackend, connectivity: ConnectivityMonitor) -> Self {
        let StorageBackend {
            blobs,
            catalog,
            estimator,
        } = backend;
        Self {
            probe: CapabilityProbe::new(blobs.clone(), catalog.clone()),
            quota: QuotaMonitor::new(estimator),
            connectivity,
            precache: None,
            locks: Arc::new(KeyLocks::new()),
            admission: Arc::new(Mutex::new(())),
            gate: Arc::new(RwLock::new(())),
            blobs,
            catalog,
        }
    }

    /// Cache under `params.root`, on the backend `params.backend` selects.
    pub fn open(params: &OpenParams, connectivity: ConnectivityMonitor) -> Result<Self> {
        let backend = open_backend(params.backend, params)?;
        let mut cache = Self::new(backend, connectivity);
        if params.precache {
            match PrecacheController::open(params.precache_dir()) {
                Ok(pc) => cache = cache.with_precache(Arc::new(pc)),
                // The shell precache is optional; chapters work without it.
                Err(e) => tracing::warn!(error = %e, "precache unavailable"),
            }
        }
        tracing::debug!(
            root = %params.root.display(),
            backend = ?params.backend,
            online = cache.connectivity.is_online(),
            "offline cache opened"
        );
        Ok(cache)
    }

    pub fn with_precache(mut self, precache: Arc<PrecacheController>) -> Self {
        self.probe = self.probe.with_precache(precache.clone());
        self.precache = Some(precache);
        self
    }

    pub fn is_supported(&self) -> bool {
        self.probe.is_supported()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.probe.probe()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn precache(&self) -> Option<&Arc<PrecacheController>> {
        self.precache.as_ref()
    }

    #[must_use = "dropping the Subscription unsubscribes the listener"]
    pub fn on_connectivity_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        self.connectivity.on_connectivity_change(listener)
    }

    /// Fail-closed: `false` on an unsupported environment or any catalog read error.
    pub async fn is_chapter_downloaded(&self, chapter_id: &str) -> bool {
        if !self.is_supported() {
            return false;
        }
        self.catalog.has(chapter_id).await
    }

    /// Store `chapter` for offline reading, replacing any earlier copy.
    ///
    /// The write runs in its own task: once started it completes even if the
    /// returned future is dropped, so a caller navigating away never leaves a
    /// half-written pair behind.
    pub async fn download_chapter(&self, chapter: ChapterContent, novel_title: &str) -> Result<()> {
        if !self.is_supported() {
            return Err(CacheError::UnsupportedEnvironment);
        }

        let entry = CatalogEntry::for_chapter(&chapter, novel_title, OffsetDateTime::now_utc());
        let payload = chapter.content.into_bytes();
        let blobs = self.blobs.clone();
        let catalog = self.catalog.clone();
        let quota = self.quota.clone();
        let locks = self.locks.clone();
        let admission = self.admission.clone();
        let gate = self.gate.clone();
        let online = self.connectivity.is_online();

        let task = tokio::spawn(async move {
            let _gate = gate.read_owned().await;
            let _key = locks.acquire(&entry.chapter_id).await;
            let admitted = admission.lock_owned().await;
            let bounded = admit(&quota, blobs.as_ref(), &entry.chapter_id, payload.len() as u64).await?;
            // Without a ceiling there is nothing to serialize on.
            let _admitted = bounded.then_some(admitted);

            // Catalog stays untouched unless the blob landed.
            blobs.put(&entry.chapter_id, &payload).await?;
            catalog.upsert(entry.clone()).await?;
            tracing::info!(
                chapter_id = %entry.chapter_id,
                novel_id = entry.novel_id,
                bytes = entry.size_bytes,
                online,
                "chapter downloaded"
            );
            Ok::<_, CacheError>(())
        });
        match task.await {
            Ok(res) => res,
            Err(e) => Err(CacheError::Io(std::io::Error::other(format!(
                "download task failed: {e}"
            )))),
        }
    }

    /// `None` unless both halves are present and agree.
    pub async fn get_offline_chapter(&self, chapter_id: &str) -> Option<DownloadedChapter> {
        if !self.is_supported() {
            return None;
        }
        let _key = self.locks.acquire(chapter_id).await;
        match self.load_pair(chapter_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(chapter_id, error = %e, "offline chapter unreadable");
                None
            }
        }
    }

    /// Every complete pair, in no particular order. Entries whose blob has gone
    /// missing are left out.
    pub async fn get_all_downloaded_chapters(&self) -> Vec<DownloadedChapter> {
        if !self.is_supported() {
            return Vec::new();
        }
        let entries = match self.catalog.list().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "catalog listing failed");
                return Vec::new();
            }
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let _key = self.locks.acquire(&entry.chapter_id).await;
            match self.load_pair(&entry.chapter_id).await {
                Ok(Some(ch)) => out.push(ch),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(chapter_id = %entry.chapter_id, error = %e, "skipping unreadable chapter")
                }
            }
        }
        out
    }

    /// Idempotent; removing an absent chapter succeeds.
    pub async fn remove_chapter(&self, chapter_id: &str) -> Result<()> {
        if !self.is_supported() {
            return Err(CacheError::UnsupportedEnvironment);
        }
        let blobs = self.blobs.clone();
        let catalog = self.catalog.clone();
        let locks = self.locks.clone();
        let gate = self.gate.clone();
        let id = chapter_id.to_string();

        let task = tokio::spawn(async move {
            let _gate = gate.read_owned().await;
            let _key = locks.acquire(&id).await;
            blobs.delete(&id).await?;
            catalog.remove(&id).await?;
            tracing::info!(chapter_id = %id, "chapter removed");
            Ok::<_, CacheError>(())
        });
        match task.await {
            Ok(res) => res,
            Err(e) => Err(CacheError::Io(std::io::Error::other(format!(
                "remove task failed: {e}"
            )))),
        }
    }

    pub async fn get_storage_usage(&self) -> StorageUsageSnapshot {
        self.quota.get_storage_usage().await
    }

    pub async fn stats(&self) -> Result<Stats> {
        self.catalog.stats().await
    }

    /// Compact the catalog and delete blobs no catalog entry points at.
    pub async fn vacuum(&self) -> Result<VacuumReport> {
        if !self.is_supported() {
            return Err(CacheError::UnsupportedEnvironment);
        }
        let _exclusive = self.gate.write().await;
        self.catalog.compact().await?;
        let keep: HashSet<String> = self
            .catalog
            .list()
            .await?
            .into_iter()
            .map(|e| e.chapter_id)
            .collect();
        let orphan_blobs = self.blobs.retain(&keep).await?;
        tracing::info!(kept = keep.len(), orphan_blobs, "vacuum finished");
        Ok(VacuumReport { orphan_blobs })
    }

    async fn load_pair(&self, chapter_id: &str) -> Result<Option<DownloadedChapter>> {
        let Some(entry) = self.catalog.get(chapter_id).await? else {
            return Ok(None);
        };
        let Some(payload) = self.blobs.get(chapter_id).await? else {
            tracing::debug!(chapter_id, "catalog entry without blob");
            return Ok(None);
        };
        if !entry.matches(&payload) {
            tracing::warn!(chapter_id, "blob does not match catalog entry");
            return Ok(None);
        }
        let content = String::from_utf8(payload)
            .map_err(|e| CacheError::Format(format!("chapter {chapter_id} is not UTF-8: {e}")))?;
        Ok(Some(DownloadedChapter::from_entry(entry, content)))
    }
}

/// Check that a write of `plain_len` bytes fits under the reported quota.
/// Both sides are in the store's own units: its worst-case footprint for the
/// new payload against usage minus what the replaced blob occupies now.
/// Returns whether a ceiling applied. An unknown quota or failed estimate
/// admits the write; the store still fails with a storage-full error if
/// space really runs out.
async fn admit(
    quota: &QuotaMonitor,
    blobs: &dyn BlobStore,
    chapter_id: &str,
    plain_len: u64,
) -> Result<bool> {
    let est = match quota.estimate().await {
        Ok(est) => est,
        Err(e) => {
            tracing::debug!(error = %e, "no storage estimate; skipping quota check");
            return Ok(false);
        }
    };
    let Some(ceiling) = est.quota else {
        return Ok(false);
    };
    let reclaimed = match blobs.stored_len(chapter_id).await {
        Ok(len) => len.unwrap_or(0),
        Err(_) => 0,
    };
    let needed = blobs.footprint(plain_len);
    let available = ceiling.saturating_sub(est.usage.saturating_sub(reclaimed));
    if needed > available {
        tracing::warn!(chapter_id, needed, available, "quota exceeded");
        return Err(CacheError::QuotaExceeded { needed, available });
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::repo_mem::{MemoryBlobStore, MemoryCatalog};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn online() -> ConnectivityMonitor {
        ConnectivityMonitor::new(true)
    }

    fn chapter(id: &str, novel_id: u64, n: u32, content: &str) -> ChapterContent {
        ChapterContent {
            id: id.to_string(),
            novel_id,
            chapter_number: n,
            title: format!("Chapter {n}"),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn quota_rejection_leaves_no_trace() {
        let cache = OfflineCache::new(StorageBackend::memory(Some(16)), online());
        cache
            .download_chapter(chapter("a", 1, 1, "0123456789"), "N")
            .await
            .unwrap();
        let err = cache
            .download_chapter(chapter("b", 1, 2, "0123456789"), "N")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert!(!cache.is_chapter_downloaded("b").await);

        // Replacing an existing chapter only needs the difference.
        cache
            .download_chapter(chapter("a", 1, 1, "0123456789abcdef"), "N")
            .await
            .unwrap();
    }

    /// Blob store that accepts nothing.
    struct BrokenBlobs;

    #[async_trait]
    impl BlobStore for BrokenBlobs {
        fn is_available(&self) -> bool {
            true
        }
        async fn put(&self, _: &str, _: &[u8]) -> Result<()> {
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into())
        }
        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn delete(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn retain(&self, _: &HashSet<String>) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn blob_failure_never_reaches_catalog() {
        let catalog = Arc::new(MemoryCatalog::new());
        let cache = OfflineCache::new(
            StorageBackend {
                blobs: Arc::new(BrokenBlobs),
                catalog: catalog.clone(),
                estimator: Arc::new(MemoryBlobStore::default()),
            },
            online(),
        );
        let err = cache
            .download_chapter(chapter("x", 1, 1, "text"), "N")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert!(catalog.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_blob_is_excluded_not_broken() {
        let backend = StorageBackend::memory(None);
        let blobs = backend.blobs.clone();
        let cache = OfflineCache::new(backend, online());
        cache
            .download_chapter(chapter("a", 1, 1, "alpha"), "N")
            .await
            .unwrap();
        cache
            .download_chapter(chapter("b", 1, 2, "beta"), "N")
            .await
            .unwrap();
        // Out-of-band eviction of one payload.
        blobs.delete("a").await.unwrap();

        assert!(cache.get_offline_chapter("a").await.is_none());
        let all = cache.get_all_downloaded_chapters().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].chapter_id, "b");
    }

    #[tokio::test]
    async fn payload_swapped_underneath_reads_as_absent() {
        let backend = StorageBackend::memory(None);
        let blobs = backend.blobs.clone();
        let cache = OfflineCache::new(backend, online());
        cache
            .download_chapter(chapter("a", 1, 1, "alpha"), "N")
            .await
            .unwrap();
        cache
            .download_chapter(chapter("b", 1, 2, "beta"), "N")
            .await
            .unwrap();
        // Same length, different bytes: only the digest can tell.
        blobs.put("a", b"omega").await.unwrap();

        assert!(cache.is_chapter_downloaded("a").await);
        assert!(cache.get_offline_chapter("a").await.is_none());
        let ids: Vec<String> = cache
            .get_all_downloaded_chapters()
            .await
            .into_iter()
            .map(|c| c.chapter_id)
            .collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn same_id_writes_never_mix() {
        let cache = OfflineCache::new(StorageBackend::memory(None), online());
        let mut tasks = Vec::new();
        for i in 0..16u32 {
            let c = cache.clone();
            tasks.push(tokio::spawn(async move {
                let body = format!("version {i} ").repeat(i as usize + 1);
                let mut ch = chapter("shared", 9, 1, &body);
                ch.title = format!("v{i}");
                c.download_chapter(ch, "Race").await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        let got = cache.get_offline_chapter("shared").await.unwrap();
        let i: usize = got.title.trim_start_matches('v').parse().unwrap();
        assert_eq!(got.content, format!("version {i} ").repeat(i + 1));
        assert_eq!(cache.get_all_downloaded_chapters().await.len(), 1);
        assert_eq!(cache.locks.inflight(), 0);
    }

    /// Blob store whose puts park until released, to observe cancellation.
    struct ParkedBlobs {
        inner: MemoryBlobStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl BlobStore for ParkedBlobs {
        fn is_available(&self) -> bool {
            true
        }
        async fn put(&self, id: &str, payload: &[u8]) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.put(id, payload).await
        }
        async fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(id).await
        }
        async fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id).await
        }
        async fn retain(&self, keep: &HashSet<String>) -> Result<u64> {
            self.inner.retain(keep).await
        }
    }

    #[tokio::test]
    async fn abandoned_download_still_completes() {
        let blobs = Arc::new(ParkedBlobs {
            inner: MemoryBlobStore::default(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let cache = OfflineCache::new(
            StorageBackend {
                blobs: blobs.clone(),
                catalog: Arc::new(MemoryCatalog::new()),
                estimator: Arc::new(MemoryBlobStore::default()),
            },
            online(),
        );

        let c = cache.clone();
        let caller = tokio::spawn(async move {
            c.download_chapter(chapter("gone", 1, 1, "kept anyway"), "N")
                .await
        });
        blobs.entered.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        blobs.release.notify_one();
        let done = tokio::time::timeout(Duration::from_secs(5), async {
            while !cache.is_chapter_downloaded("gone").await {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(done.is_ok());
        assert_eq!(
            cache.get_offline_chapter("gone").await.unwrap().content,
            "kept anyway"
        );
    }

    #[tokio::test]
    async fn vacuum_drops_orphans_only() {
        let backend = StorageBackend::memory(None);
        let blobs = backend.blobs.clone();
        let cache = OfflineCache::new(backend, online());
        cache
            .download_chapter(chapter("a", 1, 1, "alpha"), "N")
            .await
            .unwrap();
        // A blob whose catalog write never happened.
        blobs.put("stray", b"interrupted").await.unwrap();

        let report = cache.vacuum().await.unwrap();
        assert_eq!(report.orphan_blobs, 1);
        assert!(cache.get_offline_chapter("a").await.is_some());
        assert_eq!(blobs.get("stray").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unsupported_environment_blocks_mutations() {
        let blobs = Arc::new(MemoryBlobStore::default());
        blobs.set_available(false);
        let cache = OfflineCache::new(
            StorageBackend {
                blobs: blobs.clone(),
                catalog: Arc::new(MemoryCatalog::new()),
                estimator: blobs,
            },
            online(),
        );
        assert!(!cache.is_supported());
        assert_eq!(
            cache.remove_chapter("x").await.unwrap_err().kind(),
            ErrorKind::UnsupportedEnvironment
        );
        assert!(cache.vacuum().await.is_err());
        assert_eq!(cache.get_storage_usage().await, StorageUsageSnapshot::default());
    }
}
