#![forbid(unsafe_code)]

pub mod error;
pub mod policy;

pub mod util {
    pub mod varint;
}

pub mod codec;

pub mod crypto {
    pub mod aead;
    pub mod hex;
    pub mod kdf;
}

pub mod container {
    pub mod envelope;
    pub mod journal;
}

pub mod index {
    pub mod inmem;
}

pub mod domain;
pub mod stats;

pub mod repo;
pub mod repo_factory;
pub mod repo_fs;
pub mod repo_mem;

pub mod cache;
pub mod connectivity;
pub mod precache;
pub mod probe;
pub mod quota;

// Re-exports: stable API surface
pub use cache::{OfflineCache, VacuumReport};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, Subscription};
pub use domain::{ChapterContent, DownloadedChapter, StorageUsageSnapshot, by_novel};
pub use error::{CacheError, ErrorKind, Result};
pub use repo::OpenParams;
pub use repo_factory::{Backend, StorageBackend};
