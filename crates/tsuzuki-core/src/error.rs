use thiserror::Error;

#[derive(Debug, Error)]
pub enum TsuzukiError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("store is no longer reachable")]
    StoreClosed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backup format version {0} is newer than this build supports")]
    UnsupportedBackup(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TsuzukiError {
    /// Whether the store itself is gone, so no further reads or writes can succeed.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::StoreClosed)
    }
}
