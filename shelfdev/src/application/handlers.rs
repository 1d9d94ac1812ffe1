use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use shelf_core::connectivity::TcpProbe;
use shelf_core::error::{CacheError, Result};
use shelf_core::precache::{DirAssetSource, ShellManifest};
use shelf_core::{ChapterContent, OfflineCache, by_novel};

const SELFTEST_ID: &str = "987654321";
const SELFTEST_CONTENT: &str = "This is a test chapter used by the PWA diagnostics.";

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| CacheError::Format(e.to_string()))
}

pub fn handle_probe(cache: &OfflineCache) -> Result<()> {
    let caps = cache.capabilities();
    println!("{}", to_json(&caps)?);
    if !caps.is_supported() {
        eprintln!("probe: offline storage NOT supported here");
    }
    Ok(())
}

pub async fn handle_download(
    cache: &OfflineCache,
    chapter_id: String,
    novel_id: u64,
    novel_title: String,
    chapter_number: u32,
    title: String,
    file: Option<PathBuf>,
) -> Result<()> {
    let content = match file {
        Some(path) => std::fs::read_to_string(&path)?,
        None => {
            let mut s = String::new();
            tokio::io::stdin().read_to_string(&mut s).await?;
            s
        }
    };
    let bytes = content.len();
    let chapter = ChapterContent {
        id: chapter_id,
        novel_id,
        chapter_number,
        title,
        content,
    };
    let id = chapter.id.clone();
    cache.download_chapter(chapter, &novel_title).await?;
    eprintln!("download: {id} ({bytes} bytes)");
    Ok(())
}

pub async fn handle_cat(cache: &OfflineCache, chapter_id: &str) -> Result<()> {
    match cache.get_offline_chapter(chapter_id).await {
        Some(ch) => {
            print!("{}", ch.content);
            Ok(())
        }
        None => Err(CacheError::NotFound(chapter_id.to_string())),
    }
}

pub async fn handle_ls(cache: &OfflineCache, novel: Option<u64>, long: bool) -> Result<()> {
    let mut chapters = cache.get_all_downloaded_chapters().await;
    if let Some(n) = novel {
        chapters.retain(|c| c.novel_id == n);
    }
    for (novel_id, group) in by_novel(chapters) {
        let novel_title = group.first().map(|c| c.novel_title.as_str()).unwrap_or("");
        println!("{novel_id}  {novel_title}");
        for c in &group {
            if long {
                println!(
                    "  {:>5}  {:>10}  {}  {}  {}",
                    c.chapter_number,
                    c.content.len(),
                    c.downloaded_at,
                    c.chapter_id,
                    c.title
                );
            } else {
                println!("  {:>5}  {}  {}", c.chapter_number, c.chapter_id, c.title);
            }
        }
    }
    Ok(())
}

pub async fn handle_rm(cache: &OfflineCache, chapter_ids: &[String]) -> Result<()> {
    for id in chapter_ids {
        cache.remove_chapter(id).await?;
        eprintln!("rm: {id}");
    }
    Ok(())
}

pub async fn handle_usage(cache: &OfflineCache) -> Result<()> {
    let u = cache.get_storage_usage().await;
    if u.quota == 0 {
        println!("{} bytes used (quota unknown)", u.used);
    } else {
        println!("{} / {} bytes ({:.1}%)", u.used, u.quota, u.percentage);
    }
    Ok(())
}

pub async fn handle_stats(cache: &OfflineCache) -> Result<()> {
    let stats = cache.stats().await?;
    println!("{}", to_json(&stats)?);
    Ok(())
}

pub async fn handle_compact(cache: &OfflineCache) -> Result<()> {
    let report = cache.vacuum().await?;
    eprintln!("compact: removed {} orphan blob(s)", report.orphan_blobs);
    Ok(())
}

/// Round-trips a fixed chapter through the real cache and cleans up after itself.
pub async fn handle_selftest(cache: &OfflineCache) -> Result<()> {
    if !cache.is_supported() {
        return Err(CacheError::UnsupportedEnvironment);
    }
    if cache.is_chapter_downloaded(SELFTEST_ID).await {
        return Err(CacheError::Format(format!(
            "selftest: chapter {SELFTEST_ID} already cached; remove it first"
        )));
    }
    let chapter = ChapterContent {
        id: SELFTEST_ID.to_string(),
        novel_id: 0,
        chapter_number: 1,
        title: "Diagnostics".to_string(),
        content: SELFTEST_CONTENT.to_string(),
    };
    cache.download_chapter(chapter, "Selftest").await?;
    if !cache.is_chapter_downloaded(SELFTEST_ID).await {
        return Err(CacheError::Format("selftest: not listed after download".into()));
    }
    let back = cache.get_offline_chapter(SELFTEST_ID).await;
    if back.as_ref().map(|c| c.content.as_str()) != Some(SELFTEST_CONTENT) {
        return Err(CacheError::Format("selftest: content mismatch".into()));
    }
    cache.remove_chapter(SELFTEST_ID).await?;
    if cache.is_chapter_downloaded(SELFTEST_ID).await {
        return Err(CacheError::Format("selftest: still listed after removal".into()));
    }
    eprintln!("selftest: OK");
    Ok(())
}

pub async fn handle_precache(cache: &OfflineCache, manifest: PathBuf, dist: PathBuf) -> Result<()> {
    let Some(pc) = cache.precache() else {
        return Err(CacheError::Format("precache is disabled for this cache".into()));
    };
    let manifest = ShellManifest::load(&manifest)?;
    let reg = pc.register(&manifest, &DirAssetSource::new(dist)).await?;
    eprintln!(
        "precache: scope {} ({} cached, {} failed)",
        reg.scope,
        reg.cached,
        reg.failed.len()
    );
    for f in &reg.failed {
        eprintln!("  missing {f}");
    }
    Ok(())
}

pub async fn handle_online(
    cache: &OfflineCache,
    reach: Arc<TcpProbe>,
    watch: Option<u64>,
    interval: u64,
) -> Result<()> {
    let monitor = cache.connectivity();
    println!("{}", if monitor.is_online() { "online" } else { "offline" });

    let Some(secs) = watch else {
        return Ok(());
    };
    let sub = cache.on_connectivity_change(|event| println!("{event:?}"));
    let poller = monitor.spawn_poller(reach, Duration::from_secs(interval.max(1)));
    tokio::time::sleep(Duration::from_secs(secs)).await;
    poller.abort();
    sub.unsubscribe();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::ConnectivityMonitor;
    use shelf_core::repo::OpenParams;

    fn open(dir: &tempfile::TempDir) -> OfflineCache {
        OfflineCache::open(&OpenParams::new(dir.path()), ConnectivityMonitor::new(true)).unwrap()
    }

    #[tokio::test]
    async fn selftest_passes_on_fresh_cache_and_leaves_it_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        handle_selftest(&cache).await.unwrap();
        assert!(cache.get_all_downloaded_chapters().await.is_empty());
        // Runs again once the first pass cleaned up.
        handle_selftest(&cache).await.unwrap();
    }

    #[tokio::test]
    async fn selftest_refuses_to_clobber_existing_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let chapter = ChapterContent {
            id: SELFTEST_ID.to_string(),
            novel_id: 5,
            chapter_number: 3,
            title: "Real".into(),
            content: "keep me".into(),
        };
        cache.download_chapter(chapter, "Mine").await.unwrap();
        assert!(handle_selftest(&cache).await.is_err());
        assert_eq!(
            cache.get_offline_chapter(SELFTEST_ID).await.unwrap().content,
            "keep me"
        );
    }

    #[tokio::test]
    async fn cat_of_missing_chapter_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let err = handle_cat(&cache, "nope").await.unwrap_err();
        assert_eq!(err.kind(), shelf_core::ErrorKind::NotFound);
    }
}
