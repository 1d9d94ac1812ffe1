//! App-shell precache.
//!
//! Static assets listed in a [`ShellManifest`] are fetched once at registration
//! and kept under their own directory. Requests inside the registered scope go
//! to the network first and fall back to the stored copy when that fails.
//! This store shares nothing with the chapter cache.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::{CacheError, Result};

const INDEX_FILE: &str = "index.cbor";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellManifest {
    pub scope: String,
    pub assets: Vec<String>,
}

impl ShellManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::Format(format!("{}: {e}", path.display())))
    }
}

/// Where assets come from when the network is up.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Serves asset paths (`/app.js`) out of a build directory.
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetSource for DirAssetSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CacheError::NotFound(path.to_string()));
        }
        match std::fs::read(self.root.join(rel)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CacheError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CachedAsset {
    file: String,
    len: u64,
    digest: [u8; 32],
    #[serde(with = "time::serde::rfc3339")]
    fetched_at: OffsetDateTime,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PrecacheIndex {
    scope: Option<String>,
    assets: BTreeMap<String, CachedAsset>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub scope: String,
    pub cached: usize,
    /// Assets that could not be fetched; registration still succeeds without them.
    pub failed: Vec<String>,
}

pub struct PrecacheController {
    dir: PathBuf,
    index: Mutex<PrecacheIndex>,
}

impl PrecacheController {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index = match std::fs::File::open(dir.join(INDEX_FILE)) {
            Ok(f) => ciborium::de::from_reader(std::io::BufReader::new(f)).unwrap_or_else(|e| {
                tracing::warn!(dir = %dir.display(), error = %e, "precache index unreadable; starting empty");
                PrecacheIndex::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PrecacheIndex::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    pub fn is_available(&self) -> bool {
        std::fs::metadata(&self.dir)
            .map(|m| m.is_dir() && !m.permissions().readonly())
            .unwrap_or(false)
    }

    pub async fn scope(&self) -> Option<String> {
        self.index.lock().await.scope.clone()
    }

    pub async fn assets(&self) -> Vec<String> {
        self.index.lock().await.assets.keys().cloned().collect()
    }

    /// Fetch every manifest asset and record the scope. Individual fetch
    /// failures are reported in the result, not raised.
    pub async fn register(
        &self,
        manifest: &ShellManifest,
        source: &dyn AssetSource,
    ) -> Result<Registration> {
        if !manifest.scope.starts_with('/') {
            return Err(CacheError::Format(format!(
                "precache scope must be absolute, got {:?}",
                manifest.scope
            )));
        }
        let mut cached = 0;
        let mut failed = Vec::new();
        for path in &manifest.assets {
            match source.fetch(path).await {
                Ok(bytes) => {
                    self.store(path, &bytes).await?;
                    cached += 1;
                }
                Err(e) => {
                    tracing::warn!(asset = %path, error = %e, "precache fetch failed");
                    failed.push(path.clone());
                }
            }
        }

        let mut index = self.index.lock().await;
        index.scope = Some(manifest.scope.clone());
        self.save_index(&index)?;
        tracing::info!(scope = %manifest.scope, cached, failed = failed.len(), "precache registered");
        Ok(Registration {
            scope: manifest.scope.clone(),
            cached,
            failed,
        })
    }

    /// Network first; within scope, fall back to the stored copy when the network fails.
    pub async fn serve(&self, path: &str, network: &dyn AssetSource) -> Result<Vec<u8>> {
        let in_scope = self
            .scope()
            .await
            .is_some_and(|scope| path.starts_with(&scope));
        match network.fetch(path).await {
            Ok(bytes) => {
                if in_scope && self.index.lock().await.assets.contains_key(path) {
                    if let Err(e) = self.store(path, &bytes).await {
                        tracing::debug!(asset = %path, error = %e, "precache refresh skipped");
                    }
                }
                Ok(bytes)
            }
            Err(net_err) if in_scope => match self.cached(path).await? {
                Some(bytes) => {
                    tracing::debug!(asset = %path, "served from precache");
                    Ok(bytes)
                }
                None => Err(net_err),
            },
            Err(net_err) => Err(net_err),
        }
    }

    pub async fn cached(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(asset) = self.index.lock().await.assets.get(path).cloned() else {
            return Ok(None);
        };
        let bytes = match std::fs::read(self.dir.join(&asset.file)) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if blake3::hash(&bytes).as_bytes() != &asset.digest {
            return Err(CacheError::Format(format!("precached {path} is corrupt")));
        }
        Ok(Some(bytes))
    }

    async fn store(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let file = format!("{}.asset", blake3::hash(path.as_bytes()).to_hex());
        write_atomic(&self.dir, &file, bytes)?;
        let asset = CachedAsset {
            file,
            len: bytes.len() as u64,
            digest: *blake3::hash(bytes).as_bytes(),
            fetched_at: OffsetDateTime::now_utc(),
        };
        let mut index = self.index.lock().await;
        index.assets.insert(path.to_string(), asset);
        self.save_index(&index)
    }

    fn save_index(&self, index: &PrecacheIndex) -> Result<()> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(index, &mut buf)
            .map_err(|e| CacheError::Format(format!("precache index encode: {e}")))?;
        write_atomic(&self.dir, INDEX_FILE, &buf)
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name))
        .map_err(|e| CacheError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Down;

    #[async_trait]
    impl AssetSource for Down {
        async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
            Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("offline fetching {path}"),
            )))
        }
    }

    fn build_dir() -> tempfile::TempDir {
        let dist = tempfile::tempdir().unwrap();
        std::fs::write(dist.path().join("index.html"), b"<html>shell</html>").unwrap();
        std::fs::create_dir(dist.path().join("assets")).unwrap();
        std::fs::write(dist.path().join("assets").join("app.js"), b"boot()").unwrap();
        dist
    }

    fn manifest() -> ShellManifest {
        ShellManifest {
            scope: "/".into(),
            assets: vec![
                "/index.html".into(),
                "/assets/app.js".into(),
                "/missing.css".into(),
            ],
        }
    }

    #[tokio::test]
    async fn offline_requests_fall_back_to_precache() {
        let dist = build_dir();
        let cache_dir = tempfile::tempdir().unwrap();
        let pc = PrecacheController::open(cache_dir.path()).unwrap();
        let reg = pc
            .register(&manifest(), &DirAssetSource::new(dist.path()))
            .await
            .unwrap();
        assert_eq!(reg.cached, 2);
        assert_eq!(reg.failed, vec!["/missing.css".to_string()]);
        assert_eq!(pc.scope().await.as_deref(), Some("/"));

        assert_eq!(pc.serve("/assets/app.js", &Down).await.unwrap(), b"boot()");
        assert!(pc.serve("/missing.css", &Down).await.is_err());

        // Survives a restart.
        drop(pc);
        let pc = PrecacheController::open(cache_dir.path()).unwrap();
        assert_eq!(pc.serve("/index.html", &Down).await.unwrap(), b"<html>shell</html>");
    }

    #[tokio::test]
    async fn out_of_scope_paths_are_never_served_from_cache() {
        let dist = build_dir();
        let cache_dir = tempfile::tempdir().unwrap();
        let pc = PrecacheController::open(cache_dir.path()).unwrap();
        let m = ShellManifest {
            scope: "/assets/".into(),
            assets: vec!["/index.html".into(), "/assets/app.js".into()],
        };
        pc.register(&m, &DirAssetSource::new(dist.path())).await.unwrap();
        assert!(pc.serve("/index.html", &Down).await.is_err());
        assert!(pc.serve("/assets/app.js", &Down).await.is_ok());
    }

    #[tokio::test]
    async fn dir_source_rejects_traversal() {
        let dist = build_dir();
        let src = DirAssetSource::new(dist.path().join("assets"));
        assert!(src.fetch("/../index.html").await.is_err());
        assert_eq!(src.fetch("/app.js").await.unwrap(), b"boot()");
    }

    #[tokio::test]
    async fn relative_scope_is_rejected() {
        let cache_dir = tempfile::tempdir().unwrap();
        let pc = PrecacheController::open(cache_dir.path()).unwrap();
        let m = ShellManifest {
            scope: "app".into(),
            assets: vec![],
        };
        let res = pc.register(&m, &DirAssetSource::new(cache_dir.path())).await;
        assert!(res.is_err());
        assert_eq!(pc.scope().await, None);
    }
}
