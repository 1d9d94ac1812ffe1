use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::codec::CodecId;
use crate::container::envelope::{self, BlobHeader, HEADER_LEN};
use crate::container::journal::{Journal, LogRecord};
use crate::crypto::aead::AeadKey;
use crate::crypto::hex::short;
use crate::domain::CatalogEntry;
use crate::error::{CacheError, Result};
use crate::index::inmem::InMemIndex;
use crate::repo::{BlobStore, CatalogIndex, StorageEstimate, StorageEstimator};
use crate::stats::Stats;

const BLOB_EXT: &str = "blob";

/// One envelope file per chapter under `dir`, named by the BLAKE3 of the chapter id.
pub struct FsBlobStore {
    dir: PathBuf,
    codec: CodecId,
    level: i32,
    key: Option<AeadKey>,
}

impl FsBlobStore {
    pub fn new(dir: impl Into<PathBuf>, codec: CodecId, level: i32, key: Option<AeadKey>) -> Self {
        Self {
            dir: dir.into(),
            codec,
            level,
            key,
        }
    }

    fn blob_path(&self, chapter_id: &str) -> PathBuf {
        self.dir.join(blob_file_name(chapter_id))
    }
}

fn blob_file_name(chapter_id: &str) -> String {
    format!("{}.{BLOB_EXT}", blake3::hash(chapter_id.as_bytes()).to_hex())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn is_available(&self) -> bool {
        writable_dir(&self.dir)
    }

    async fn put(&self, chapter_id: &str, payload: &[u8]) -> Result<()> {
        let (header, body) =
            envelope::encode(chapter_id, payload, self.codec, self.level, self.key.as_ref())?;
        // Until persist() renames it into place the payload lives in an anonymous temp
        // file, which is unlinked on any early return.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        header.write_to(tmp.as_file_mut())?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.blob_path(chapter_id))
            .map_err(|e| CacheError::Io(e.error))?;
        tracing::debug!(
            chapter_id,
            plain = header.plain_len,
            stored = header.body_len,
            codec = ?header.codec,
            digest = %short(&header.digest),
            "blob written"
        );
        Ok(())
    }

    async fn get(&self, chapter_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(chapter_id);
        let f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file_len = f.metadata()?.len();
        let mut r = BufReader::new(f);
        let header = BlobHeader::read_from(&mut r)?;
        if (HEADER_LEN as u64).checked_add(header.body_len) != Some(file_len) {
            return Err(CacheError::Format(format!(
                "{}: header claims {} body bytes, file has {}",
                path.display(),
                header.body_len,
                file_len.saturating_sub(HEADER_LEN as u64)
            )));
        }
        let mut body = vec![0u8; header.body_len as usize];
        r.read_exact(&mut body)?;
        envelope::decode(chapter_id, &header, &body, self.key.as_ref()).map(Some)
    }

    fn footprint(&self, payload_len: u64) -> u64 {
        envelope::stored_bound(payload_len, self.codec, self.key.is_some())
    }

    async fn stored_len(&self, chapter_id: &str) -> Result<Option<u64>> {
        match std::fs::metadata(self.blob_path(chapter_id)) {
            Ok(m) => Ok(Some(m.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, chapter_id: &str) -> Result<()> {
        match std::fs::remove_file(self.blob_path(chapter_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn retain(&self, keep: &HashSet<String>) -> Result<u64> {
        let keep_names: HashSet<String> = keep.iter().map(|id| blob_file_name(id)).collect();
        let mut removed = 0u64;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep_names.contains(&name) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

struct CatalogState {
    journal: Journal,
    index: InMemIndex,
}

/// Catalog backed by the append-only journal, replayed into memory at open.
pub struct FsCatalog {
    path: PathBuf,
    compact_after: u64,
    state: Mutex<CatalogState>,
}

impl FsCatalog {
    pub fn open(path: &Path, compact_after: u64) -> Result<Self> {
        let (journal, recs) = Journal::open(path)?;
        let mut index = InMemIndex::replay(&recs);
        index.stats.journal_records = journal.records;
        tracing::debug!(
            path = %path.display(),
            entries = index.stats.entries,
            records = journal.records,
            "catalog replayed"
        );
        Ok(Self {
            path: path.to_path_buf(),
            compact_after,
            state: Mutex::new(CatalogState { journal, index }),
        })
    }

    /// The in-memory view is only trusted while its log still exists on disk.
    fn ensure_present(&self) -> Result<()> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(CacheError::unavailable("catalog journal"))
        }
    }

    fn compact_locked(st: &mut CatalogState) -> Result<()> {
        let before = st.journal.records;
        st.journal.rewrite(st.index.snapshot().iter())?;
        st.index.stats.journal_records = st.journal.records;
        st.index.stats.compactions += 1;
        tracing::info!(
            path = %st.journal.path().display(),
            before,
            after = st.journal.records,
            "catalog compacted"
        );
        Ok(())
    }

    fn append_locked(&self, st: &mut CatalogState, rec: LogRecord) -> Result<()> {
        st.journal.append(&rec)?;
        st.index.apply(&rec);
        st.index.stats.journal_records = st.journal.records;
        if self.compact_after > 0
            && st.journal.records >= self.compact_after
            && st.journal.records > st.index.stats.entries
        {
            // The record is already durable; a failed rewrite only delays compaction.
            if let Err(e) = Self::compact_locked(st) {
                tracing::warn!(error = %e, "catalog compaction failed");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogIndex for FsCatalog {
    fn is_available(&self) -> bool {
        self.path.is_file() && self.path.parent().is_none_or(writable_dir)
    }

    async fn contains(&self, chapter_id: &str) -> Result<bool> {
        let st = self.state.lock().await;
        self.ensure_present()?;
        Ok(st.index.by_id.contains_key(chapter_id))
    }

    async fn upsert(&self, entry: CatalogEntry) -> Result<()> {
        let mut st = self.state.lock().await;
        self.ensure_present()?;
        self.append_locked(&mut st, LogRecord::Upsert(entry))
    }

    async fn remove(&self, chapter_id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        self.ensure_present()?;
        if !st.index.by_id.contains_key(chapter_id) {
            return Ok(());
        }
        self.append_locked(
            &mut st,
            LogRecord::Remove {
                chapter_id: chapter_id.to_string(),
            },
        )
    }

    async fn list(&self) -> Result<Vec<CatalogEntry>> {
        let st = self.state.lock().await;
        self.ensure_present()?;
        Ok(st.index.by_id.values().cloned().collect())
    }

    async fn get(&self, chapter_id: &str) -> Result<Option<CatalogEntry>> {
        let st = self.state.lock().await;
        self.ensure_present()?;
        Ok(st.index.by_id.get(chapter_id).cloned())
    }

    async fn stats(&self) -> Result<Stats> {
        let st = self.state.lock().await;
        self.ensure_present()?;
        Ok(st.index.stats.clone())
    }

    async fn compact(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        self.ensure_present()?;
        Self::compact_locked(&mut st)
    }
}

/// Usage is the on-disk size of everything under the cache root.
pub struct FsEstimator {
    root: PathBuf,
    quota: Option<u64>,
}

impl FsEstimator {
    pub fn new(root: impl Into<PathBuf>, quota: Option<u64>) -> Self {
        Self {
            root: root.into(),
            quota,
        }
    }
}

#[async_trait]
impl StorageEstimator for FsEstimator {
    async fn estimate(&self) -> Result<StorageEstimate> {
        if !self.root.is_dir() {
            return Err(CacheError::unavailable("cache root"));
        }
        let usage = walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();
        Ok(StorageEstimate {
            usage,
            quota: self.quota,
        })
    }
}

fn writable_dir(dir: &Path) -> bool {
    std::fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn entry(id: &str, content: &str) -> CatalogEntry {
        CatalogEntry {
            chapter_id: id.to_string(),
            novel_id: 3,
            novel_title: "Tower".into(),
            chapter_number: 1,
            title: "Start".into(),
            size_bytes: content.len() as u64,
            downloaded_at: OffsetDateTime::UNIX_EPOCH,
            digest: *blake3::hash(content.as_bytes()).as_bytes(),
        }
    }

    #[tokio::test]
    async fn blob_overwrite_delete_and_odd_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), CodecId::Zstd, 3, None);
        assert!(store.is_available());

        let id = "../../etc/passwd";
        store.put(id, b"first").await.unwrap();
        store.put(id, b"second").await.unwrap();
        assert_eq!(store.get(id).await.unwrap().as_deref(), Some(&b"second"[..]));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_blob_is_an_error_not_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), CodecId::Store, 0, None);
        store.put("c", b"some chapter body").await.unwrap();
        let path = store.blob_path("c");
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 4)
            .unwrap();
        assert!(store.get("c").await.is_err());
    }

    #[tokio::test]
    async fn retain_sweeps_orphans_and_temp_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), CodecId::Zstd, 3, None);
        store.put("keep", b"k").await.unwrap();
        store.put("drop", b"d").await.unwrap();
        std::fs::write(dir.path().join(".tmpXYZ"), b"half").unwrap();

        let keep: HashSet<String> = ["keep".to_string()].into_iter().collect();
        assert_eq!(store.retain(&keep).await.unwrap(), 2);
        assert!(store.get("keep").await.unwrap().is_some());
        assert!(store.get("drop").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn catalog_survives_reopen_and_compacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.log");
        {
            let cat = FsCatalog::open(&path, 4).unwrap();
            cat.upsert(entry("a", "one")).await.unwrap();
            cat.upsert(entry("a", "one again")).await.unwrap();
            cat.upsert(entry("b", "two")).await.unwrap();
            cat.remove("b").await.unwrap();
            cat.remove("b").await.unwrap();
            let stats = cat.stats().await.unwrap();
            assert_eq!(stats.compactions, 1);
            assert_eq!(stats.journal_records, 1);
        }
        let cat = FsCatalog::open(&path, 4).unwrap();
        let all = cat.list().await.unwrap();
        assert_eq!(all, vec![entry("a", "one again")]);
        assert!(cat.has("a").await);
        assert!(!cat.has("b").await);
    }

    #[tokio::test]
    async fn missing_journal_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.log");
        let cat = FsCatalog::open(&path, 0).unwrap();
        cat.upsert(entry("a", "x")).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(!cat.is_available());
        assert!(!cat.has("a").await);
        assert!(cat.list().await.is_err());
    }

    #[tokio::test]
    async fn estimator_counts_files_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("chapters")).unwrap();
        std::fs::write(dir.path().join("chapters").join("x"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("catalog.log"), vec![0u8; 20]).unwrap();
        let est = FsEstimator::new(dir.path(), Some(1000))
            .estimate()
            .await
            .unwrap();
        assert_eq!(est.usage, 120);
        assert_eq!(est.quota, Some(1000));

        let gone = FsEstimator::new(dir.path().join("nope"), None);
        assert!(gone.estimate().await.is_err());
    }
}
