use std::path::PathBuf;

/// Closed error taxonomy for the engine, replacing the ad hoc
/// `std::io::Error`/`KVSError` mix the duck-typed prototype used.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// A non-string key was supplied. The public API only accepts
    /// `String`/`&str` keys, so this is unreachable today; the variant
    /// is kept for API-contract completeness (see DESIGN.md).
    #[error("key is not a valid string")]
    KeyTypeInvalid,

    /// Placing this entry would exceed the RAM budget and the disk
    /// budget that would have to absorb the overflow.
    #[error(
        "budget exceeded: ram {ram_needed}/{ram_limit} bytes, disk {disk_needed}/{disk_limit} bytes"
    )]
    BudgetExceeded {
        ram_needed: u64,
        ram_limit: u64,
        disk_needed: u64,
        disk_limit: u64,
    },

    /// An underlying file operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A shard record failed to decode: truncated length prefix,
    /// truncated payload, undecompressable bytes, or a payload that
    /// doesn't deserialize to a single-key mapping.
    #[error("corrupt record in shard {shard}: {detail}")]
    CorruptRecord { shard: PathBuf, detail: String },
}

impl KvError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> KvError {
        KvError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(shard: impl Into<PathBuf>, detail: impl Into<String>) -> KvError {
        KvError::CorruptRecord {
            shard: shard.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KvError>;
