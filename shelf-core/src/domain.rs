// shelf_core/src/domain.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Chapter as handed over by the API client, before it is cached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub id: String,
    pub novel_id: u64,
    pub chapter_number: u32,
    pub title: String,
    pub content: String,
}

/// Catalog projection of a downloaded chapter; never carries the content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub chapter_id: String,
    pub novel_id: u64,
    pub novel_title: String,
    pub chapter_number: u32,
    pub title: String,
    /// UTF-8 length of the content.
    pub size_bytes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub downloaded_at: OffsetDateTime,
    /// BLAKE3 of the content; must match the blob for the pair to count.
    pub digest: [u8; 32],
}

impl CatalogEntry {
    pub fn for_chapter(
        chapter: &ChapterContent,
        novel_title: &str,
        downloaded_at: OffsetDateTime,
    ) -> Self {
        Self {
            chapter_id: chapter.id.clone(),
            novel_id: chapter.novel_id,
            novel_title: novel_title.to_string(),
            chapter_number: chapter.chapter_number,
            title: chapter.title.clone(),
            size_bytes: chapter.content.len() as u64,
            downloaded_at,
            digest: *blake3::hash(chapter.content.as_bytes()).as_bytes(),
        }
    }

    pub fn matches(&self, payload: &[u8]) -> bool {
        payload.len() as u64 == self.size_bytes && blake3::hash(payload).as_bytes() == &self.digest
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedChapter {
    pub chapter_id: String,
    pub novel_id: u64,
    pub novel_title: String,
    pub chapter_number: u32,
    pub title: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub downloaded_at: OffsetDateTime,
}

impl DownloadedChapter {
    pub fn from_entry(entry: CatalogEntry, content: String) -> Self {
        Self {
            chapter_id: entry.chapter_id,
            novel_id: entry.novel_id,
            novel_title: entry.novel_title,
            chapter_number: entry.chapter_number,
            title: entry.title,
            content,
            downloaded_at: entry.downloaded_at,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageUsageSnapshot {
    pub used: u64,
    /// Zero when the environment cannot report a ceiling.
    pub quota: u64,
    /// Always within `[0, 100]`.
    pub percentage: f64,
}

impl StorageUsageSnapshot {
    pub fn new(used: u64, quota: u64) -> Self {
        let percentage = if quota == 0 {
            0.0
        } else {
            (used as f64 / quota as f64 * 100.0).clamp(0.0, 100.0)
        };
        Self {
            used,
            quota,
            percentage,
        }
    }
}

/// Groups chapters per novel, each group in ascending chapter order.
pub fn by_novel(chapters: Vec<DownloadedChapter>) -> BTreeMap<u64, Vec<DownloadedChapter>> {
    let mut out: BTreeMap<u64, Vec<DownloadedChapter>> = BTreeMap::new();
    for c in chapters {
        out.entry(c.novel_id).or_default().push(c);
    }
    for group in out.values_mut() {
        group.sort_by(|a, b| {
            a.chapter_number
                .cmp(&b.chapter_number)
                .then_with(|| a.chapter_id.cmp(&b.chapter_id))
        });
    }
    out
}
