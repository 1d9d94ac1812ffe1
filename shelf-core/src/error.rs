use thiserror::Error;

/// Coarse classification callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedEnvironment,
    QuotaExceeded,
    PersistenceFailure,
    NotFound,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("offline storage is not supported in this environment")]
    UnsupportedEnvironment,

    #[error("storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::UnsupportedEnvironment => ErrorKind::UnsupportedEnvironment,
            CacheError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            CacheError::Io(e) if is_storage_full(e) => ErrorKind::QuotaExceeded,
            CacheError::Io(_) | CacheError::Format(_) => ErrorKind::PersistenceFailure,
            CacheError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    pub(crate) fn unavailable(what: &str) -> Self {
        CacheError::Io(std::io::Error::other(format!("{what} unavailable")))
    }
}

fn is_storage_full(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded
    )
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, CacheError>;
