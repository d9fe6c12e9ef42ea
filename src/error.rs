//! Error types for Skiff
//!
//! All fallible operations in the crate return [`Result`]. The broker core
//! distinguishes errors that are surfaced to callers synchronously
//! (validation failures such as [`SkiffError::InvalidPartition`]) from
//! errors that background tasks log and absorb per item (retention and
//! registry publication), and from the one class treated as fatal: an I/O
//! failure on the flush path.

use thiserror::Error;

/// Result type alias for Skiff operations
pub type Result<T> = std::result::Result<T, SkiffError>;

#[derive(Error, Debug)]
pub enum SkiffError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Partition index outside `[0, num_partitions)` for the topic.
    ///
    /// Driven by client input, so callers log this at warn rather than
    /// error. An empty topic name reports `num_partitions = 0`: an empty
    /// topic has no partition space.
    #[error("Invalid partition {partition} for topic '{topic}', valid partitions [0, {num_partitions})")]
    InvalidPartition {
        topic: String,
        partition: i32,
        num_partitions: i32,
    },

    #[error("Corrupt log data: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SkiffError {
    /// Shorthand for a storage error with a formatted message
    pub fn storage_msg(msg: impl Into<String>) -> Self {
        SkiffError::Storage(msg.into())
    }
}
