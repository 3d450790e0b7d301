use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid cache size: {0}")]
    InvalidCacheSize(String),

    #[error("Invalid TTL setting: {0}")]
    InvalidTtl(String),

    #[error("Invalid sweep interval: {0}")]
    InvalidSweepInterval(String),

    #[error("Failed to read config file {path}: {cause}")]
    Read { path: PathBuf, cause: String },

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Caching is disabled (multiple_ttl is 0)")]
    Disabled,

    #[error("Cache size must not be less than {min} bytes (got {size})")]
    SizeTooSmall { size: usize, min: usize },

    #[error("Failed to open cache file {path}: {cause}")]
    Open {
        path: PathBuf,
        cause: std::io::Error,
    },

    #[error("Failed to map cache file {path}: {cause}")]
    Map {
        path: PathBuf,
        cause: std::io::Error,
    },

    #[error("Cache file {path} is in use by another process: {cause}")]
    Lock {
        path: PathBuf,
        cause: std::io::Error,
    },

    #[error(
        "Existing cache is not compatible (version {found_version}, size {found_size}; expected version {expected_version}, size {expected_size})"
    )]
    Incompatible {
        found_version: u32,
        found_size: u64,
        expected_version: u32,
        expected_size: u64,
    },

    #[error("Cache layout is corrupt: {0}")]
    Corrupt(String),

    #[error("Cache is full: need {need} bytes, {available} available")]
    ArenaFull { need: usize, available: usize },

    #[error("Record too large for cache: {len} bytes (limit {limit})")]
    RecordTooLarge { len: usize, limit: usize },

    #[error("Record field cannot be stored as text: {0}")]
    Unrepresentable(String),

    #[error("Access out of bounds: offset {offset}, length {len}, region {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("Malformed cached record at offset {0}")]
    MalformedBlob(usize),

    #[error("Cache has been closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CacheError {
    /// Numeric cause for initialization failures, `None` for runtime errors.
    pub fn init_code(&self) -> Option<i32> {
        match self {
            CacheError::Disabled | CacheError::SizeTooSmall { .. } | CacheError::Config(_) => {
                Some(1)
            }
            CacheError::Open { .. } => Some(2),
            CacheError::Map { .. } | CacheError::Io(_) => Some(3),
            CacheError::Lock { .. } => Some(4),
            CacheError::Incompatible { .. } | CacheError::Corrupt(_) => Some(5),
            _ => None,
        }
    }

    /// True when the failure only concerns the record being inserted.
    pub fn is_record_local(&self) -> bool {
        matches!(
            self,
            CacheError::ArenaFull { .. }
                | CacheError::RecordTooLarge { .. }
                | CacheError::Unrepresentable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
