use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub entries: u64,
    /// Sum of content lengths currently catalogued.
    pub logical_bytes: u64,
    /// Journal records since the log was created or last compacted.
    pub journal_records: u64,
    pub compactions: u64,
}
