use std::collections::BTreeMap;

use crate::container::journal::LogRecord;
use crate::domain::CatalogEntry;
use crate::stats::Stats;

#[derive(Clone, Debug, Default)]
pub struct InMemIndex {
    pub by_id: BTreeMap<String, CatalogEntry>,
    pub stats: Stats,
}

impl InMemIndex {
    pub fn replay<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a LogRecord>,
    {
        let mut index = Self::default();
        for rec in records {
            index.apply(rec);
        }
        index
    }

    pub fn apply(&mut self, rec: &LogRecord) {
        match rec {
            LogRecord::Upsert(entry) => {
                if let Some(old) = self.by_id.insert(entry.chapter_id.clone(), entry.clone()) {
                    self.stats.logical_bytes -= old.size_bytes;
                }
                self.stats.logical_bytes += entry.size_bytes;
            }
            LogRecord::Remove { chapter_id } => {
                if let Some(old) = self.by_id.remove(chapter_id) {
                    self.stats.logical_bytes -= old.size_bytes;
                }
            }
        }
        self.stats.entries = self.by_id.len() as u64;
    }

    /// The minimal record set that rebuilds the current state.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.by_id
            .values()
            .cloned()
            .map(LogRecord::Upsert)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn entry(id: &str, size: u64) -> CatalogEntry {
        CatalogEntry {
            chapter_id: id.to_string(),
            novel_id: 1,
            novel_title: "N".into(),
            chapter_number: 1,
            title: "T".into(),
            size_bytes: size,
            downloaded_at: OffsetDateTime::UNIX_EPOCH,
            digest: [0u8; 32],
        }
    }

    #[test]
    fn overwrite_does_not_double_count() {
        let recs = vec![
            LogRecord::Upsert(entry("a", 10)),
            LogRecord::Upsert(entry("b", 5)),
            LogRecord::Upsert(entry("a", 40)),
            LogRecord::Remove {
                chapter_id: "b".into(),
            },
            LogRecord::Remove {
                chapter_id: "missing".into(),
            },
        ];
        let idx = InMemIndex::replay(&recs);
        assert_eq!(idx.stats.entries, 1);
        assert_eq!(idx.stats.logical_bytes, 40);
        assert_eq!(idx.snapshot(), vec![LogRecord::Upsert(entry("a", 40))]);
    }
}
