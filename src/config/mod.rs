//! Broker configuration
//!
//! [`BrokerConfig`] carries every knob the log manager consumes: the log
//! directory, partition counts, the flush policy bundle (scheduler tick
//! rate, default interval, per-topic overrides), the retention policy bundle
//! (sweep period, default age, per-topic hours, aggregate size cap), the
//! segment rolling threshold, and the external registry toggle.
//!
//! Per-topic overrides are plain maps keyed by topic name. Retention hours
//! are configured in hours for operator convenience and converted to
//! milliseconds internally via [`BrokerConfig::retention_ms_map`].

mod defaults;

pub use defaults::*;

use crate::error::{Result, SkiffError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Broker configuration for the log manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Root directory holding one subdirectory per (topic, partition)
    #[serde(default = "defaults::default_log_dir")]
    pub log_dir: PathBuf,

    /// Default partition count per topic; must be >= 1
    #[serde(default = "defaults::default_num_partitions")]
    pub num_partitions: i32,

    /// Per-topic partition count override
    #[serde(default = "defaults::default_empty_map")]
    pub topic_partitions_map: HashMap<String, i32>,

    /// Message-count flush trigger passed through to each log
    #[serde(default = "defaults::default_flush_interval")]
    pub flush_interval: u32,

    /// Tick rate of the flush scheduler in milliseconds
    #[serde(default = "defaults::default_flush_scheduler_interval_ms")]
    pub flush_scheduler_interval_ms: u64,

    /// Default per-topic flush interval in milliseconds
    #[serde(default = "defaults::default_flush_interval_ms")]
    pub default_flush_interval_ms: u64,

    /// Per-topic flush interval override (topic -> ms)
    #[serde(default = "defaults::default_empty_map")]
    pub flush_interval_ms_map: HashMap<String, u64>,

    /// Retention sweep period in milliseconds
    #[serde(default = "defaults::default_log_cleanup_interval_ms")]
    pub log_cleanup_interval_ms: u64,

    /// Default maximum segment age in milliseconds
    #[serde(default = "defaults::default_log_cleanup_age_ms")]
    pub log_cleanup_default_age_ms: u64,

    /// Per-topic retention in hours (topic -> hours); converted to ms internally
    #[serde(default = "defaults::default_empty_map")]
    pub log_retention_hours_map: HashMap<String, u32>,

    /// Maximum aggregate bytes per log; negative means unbounded
    #[serde(default = "defaults::default_log_retention_size")]
    pub log_retention_size: i64,

    /// Segment rolling threshold in bytes for the default rolling strategy
    #[serde(default = "defaults::default_log_file_size")]
    pub log_file_size: u64,

    /// Toggles all external-registry interactions: the publisher worker,
    /// broker/topic registration, and the startup barrier
    #[serde(default = "defaults::default_false")]
    pub enable_registry: bool,

    /// Recover open segments when loading logs from disk
    #[serde(default = "defaults::default_true")]
    pub recover_on_load: bool,

    /// Terminate the process on a flush I/O error. Durability of buffered
    /// appends is unverifiable after a failed flush; continuing would
    /// silently risk data loss.
    #[serde(default = "defaults::default_true")]
    pub halt_on_flush_failure: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            log_dir: defaults::default_log_dir(),
            num_partitions: DEFAULT_NUM_PARTITIONS,
            topic_partitions_map: HashMap::new(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_scheduler_interval_ms: DEFAULT_FLUSH_SCHEDULER_INTERVAL_MS,
            default_flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            flush_interval_ms_map: HashMap::new(),
            log_cleanup_interval_ms: DEFAULT_LOG_CLEANUP_INTERVAL_MS,
            log_cleanup_default_age_ms: DEFAULT_LOG_CLEANUP_AGE_MS,
            log_retention_hours_map: HashMap::new(),
            log_retention_size: DEFAULT_LOG_RETENTION_SIZE,
            log_file_size: DEFAULT_LOG_FILE_SIZE,
            enable_registry: false,
            recover_on_load: true,
            halt_on_flush_failure: true,
        }
    }
}

impl BrokerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_partitions < 1 {
            return Err(SkiffError::Config(format!(
                "num_partitions must be >= 1, got {}",
                self.num_partitions
            )));
        }
        for (topic, count) in &self.topic_partitions_map {
            if *count < 1 {
                return Err(SkiffError::Config(format!(
                    "partition count for topic '{}' must be >= 1, got {}",
                    topic, count
                )));
            }
        }
        if self.flush_scheduler_interval_ms == 0 {
            return Err(SkiffError::Config(
                "flush_scheduler_interval_ms must be > 0".to_string(),
            ));
        }
        if self.log_cleanup_interval_ms == 0 {
            return Err(SkiffError::Config(
                "log_cleanup_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-topic retention thresholds in milliseconds, derived from the
    /// configured hours map
    pub fn retention_ms_map(&self) -> HashMap<String, u64> {
        self.log_retention_hours_map
            .iter()
            .map(|(topic, hours)| (topic.clone(), u64::from(*hours) * 60 * 60 * 1_000))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.num_partitions, 1);
        assert_eq!(config.log_retention_size, -1);
        assert!(config.halt_on_flush_failure);
        assert!(!config.enable_registry);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_partitions() {
        let config = BrokerConfig {
            num_partitions: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SkiffError::Config(_))
        ));
    }

    #[test]
    fn test_retention_hours_to_ms_round_trip() {
        let mut config = BrokerConfig::default();
        config.log_retention_hours_map.insert("orders".to_string(), 24);
        config.log_retention_hours_map.insert("events".to_string(), 1);

        let ms_map = config.retention_ms_map();
        assert_eq!(ms_map["orders"], 24 * 3_600_000);
        assert_eq!(ms_map["events"], 3_600_000);

        // converting back by division recovers the configured hours
        for (topic, hours) in &config.log_retention_hours_map {
            assert_eq!(ms_map[topic] / 3_600_000, u64::from(*hours));
        }
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: BrokerConfig =
            serde_json::from_str(r#"{"log_dir": "/var/lib/skiff", "num_partitions": 4}"#).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/var/lib/skiff"));
        assert_eq!(config.num_partitions, 4);
        assert_eq!(config.default_flush_interval_ms, DEFAULT_FLUSH_INTERVAL_MS);
        assert!(config.recover_on_load);
    }
}
