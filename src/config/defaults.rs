//! Default constants for broker configuration

use std::collections::HashMap;
use std::path::PathBuf;

/// Default root directory for log data
pub const DEFAULT_LOG_DIR: &str = "./data";

/// Default number of partitions per topic
pub const DEFAULT_NUM_PARTITIONS: i32 = 1;

/// Default message-count flush trigger inside a log
pub const DEFAULT_FLUSH_INTERVAL: u32 = 500;

/// Default flush scheduler tick rate in milliseconds
pub const DEFAULT_FLUSH_SCHEDULER_INTERVAL_MS: u64 = 1_000;

/// Default per-topic flush interval in milliseconds
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 3_000;

/// Default retention sweep period in milliseconds (10 minutes)
pub const DEFAULT_LOG_CLEANUP_INTERVAL_MS: u64 = 10 * 60 * 1_000;

/// Default maximum segment age in milliseconds (7 days)
pub const DEFAULT_LOG_CLEANUP_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1_000;

/// Default maximum aggregate log size in bytes; negative means unbounded
pub const DEFAULT_LOG_RETENTION_SIZE: i64 = -1;

/// Default segment rolling threshold in bytes (1 GiB)
pub const DEFAULT_LOG_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Delay before the first retention sweep fires (1 minute)
pub const DEFAULT_CLEANUP_INITIAL_DELAY_MS: u64 = 60 * 1_000;

pub(super) fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

pub(super) fn default_num_partitions() -> i32 {
    DEFAULT_NUM_PARTITIONS
}

pub(super) fn default_flush_interval() -> u32 {
    DEFAULT_FLUSH_INTERVAL
}

pub(super) fn default_flush_scheduler_interval_ms() -> u64 {
    DEFAULT_FLUSH_SCHEDULER_INTERVAL_MS
}

pub(super) fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

pub(super) fn default_log_cleanup_interval_ms() -> u64 {
    DEFAULT_LOG_CLEANUP_INTERVAL_MS
}

pub(super) fn default_log_cleanup_age_ms() -> u64 {
    DEFAULT_LOG_CLEANUP_AGE_MS
}

pub(super) fn default_log_retention_size() -> i64 {
    DEFAULT_LOG_RETENTION_SIZE
}

pub(super) fn default_log_file_size() -> u64 {
    DEFAULT_LOG_FILE_SIZE
}

pub(super) fn default_empty_map<V>() -> HashMap<String, V> {
    HashMap::new()
}

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_false() -> bool {
    false
}
