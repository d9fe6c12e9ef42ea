//! Log manager
//!
//! [`LogManager`] owns every log under the broker's log directory. It keeps
//! a two-level concurrent registry (topic -> partition -> log), discovers
//! and recovers logs on startup, creates new logs on demand, runs the
//! periodic flush scheduler, and hands newly created topics to the registry
//! publisher.
//!
//! # Lock Ordering
//!
//! 1. `logs` (DashMap, two levels) — use `entry()` for insert-if-absent;
//!    never hold an entry guard across I/O
//! 2. `create_lock` (Mutex) — held only around log directory creation plus
//!    `Log` construction, never around I/O on existing logs
//! 3. Per-log locks — leaves, acquired last (inside `Log` methods)
//!
//! The creation mutex is process-wide and coarse. Log creation is rare and
//! short, so a single lock is sufficient; it exists because creating a log
//! makes a directory, an external side effect that must not race for the
//! same (topic, partition) pair.
//!
//! # Startup barrier
//!
//! With registry integration enabled, `get_log` / `get_or_create_log`
//! suspend until [`LogManager::startup`] has announced the broker. Without
//! it the wait is a no-op.

use crate::config::{BrokerConfig, DEFAULT_CLEANUP_INITIAL_DELAY_MS};
use crate::error::{Result, SkiffError};
use crate::registry::{RegistryClient, TopicPublisher};
use crate::scheduler::Scheduler;
use crate::storage::log::{Log, OffsetRequest};
use crate::storage::rolling::{FixedSizeRollingStrategy, RollingStrategy};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Parse a log directory name of the form `<topic>-<partition>`.
///
/// The rightmost `-` separates the decimal partition index, so topics may
/// themselves contain `-`. Names whose right side is not a non-negative
/// decimal are rejected.
pub fn parse_log_dir_name(name: &str) -> Option<(String, i32)> {
    let (topic, partition) = name.rsplit_once('-')?;
    if topic.is_empty() || partition.is_empty() || !partition.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let partition = partition.parse::<i32>().ok()?;
    Some((topic.to_string(), partition))
}

/// The broker's collection of per-(topic, partition) logs
pub struct LogManager {
    config: BrokerConfig,
    log_dir: PathBuf,
    /// topic -> partition -> log
    logs: DashMap<String, Arc<DashMap<i32, Arc<Log>>>>,
    create_lock: Mutex<()>,
    rolling: RwLock<Option<Arc<dyn RollingStrategy>>>,
    retention_ms_map: HashMap<String, u64>,
    /// Externally supplied scheduler carrying the retention sweep
    scheduler: Arc<Scheduler>,
    /// Dedicated single-task scheduler for the flush loop
    flush_scheduler: Scheduler,
    registry: Arc<dyn RegistryClient>,
    publisher: RwLock<Option<Arc<TopicPublisher>>>,
    startup: Option<(watch::Sender<bool>, watch::Receiver<bool>)>,
    loaded: AtomicBool,
}

impl LogManager {
    /// Create a log manager. `scheduler` hosts the retention sweep;
    /// `registry` is only contacted when `config.enable_registry` is set,
    /// so a [`crate::registry::NoopRegistry`] is fine otherwise.
    pub fn new(
        config: BrokerConfig,
        scheduler: Arc<Scheduler>,
        registry: Arc<dyn RegistryClient>,
    ) -> Result<Self> {
        config.validate()?;

        let startup = config.enable_registry.then(|| watch::channel(false));
        let retention_ms_map = config.retention_ms_map();
        let log_dir = config.log_dir.clone();

        Ok(Self {
            config,
            log_dir,
            logs: DashMap::new(),
            create_lock: Mutex::new(()),
            rolling: RwLock::new(None),
            retention_ms_map,
            scheduler,
            flush_scheduler: Scheduler::new("log-flusher"),
            registry,
            publisher: RwLock::new(None),
            startup,
            loaded: AtomicBool::new(false),
        })
    }

    /// Install a rolling strategy. Must happen before [`LogManager::load`];
    /// otherwise the default fixed-size strategy is used.
    pub fn set_rolling_strategy(&self, strategy: Arc<dyn RollingStrategy>) {
        *self.rolling.write() = Some(strategy);
    }

    /// Scan the log directory, reconstruct the registry, and install the
    /// retention task. Call once, before [`LogManager::startup`].
    pub async fn load(self: &Arc<Self>) -> Result<()> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(SkiffError::Config(
                "load may only be called once per log manager".to_string(),
            ));
        }

        {
            let mut rolling = self.rolling.write();
            if rolling.is_none() {
                *rolling = Some(Arc::new(FixedSizeRollingStrategy::new(
                    self.config.log_file_size,
                )));
            }
        }

        if !self.log_dir.exists() {
            info!(dir = %self.log_dir.display(), "No log directory found, creating it");
            fs::create_dir_all(&self.log_dir)?;
        }
        if !self.log_dir.is_dir() {
            return Err(SkiffError::Config(format!(
                "{} is not a directory",
                self.log_dir.display()
            )));
        }
        let entries = fs::read_dir(&self.log_dir).map_err(|e| {
            SkiffError::Config(format!(
                "{} is not a readable log directory: {}",
                self.log_dir.display(),
                e
            ))
        })?;

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                warn!(path = %path.display(), "Skipping stray file in log directory");
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((topic, partition)) = parse_log_dir_name(&name) else {
                warn!(dir = %path.display(), "Skipping directory with unparseable name");
                continue;
            };

            info!(dir = %path.display(), "Loading log");
            let log = Log::open(
                path,
                topic.clone(),
                partition,
                self.rolling_strategy()?,
                self.config.flush_interval,
                self.config.recover_on_load,
            )?;
            let parts = self.partition_map(&topic).0;
            parts.insert(partition, Arc::new(log));
        }

        info!(
            period_ms = self.config.log_cleanup_interval_ms,
            "Starting log cleaner"
        );
        let manager = Arc::clone(self);
        self.scheduler.schedule_with_rate(
            "log-cleanup",
            Duration::from_millis(DEFAULT_CLEANUP_INITIAL_DELAY_MS),
            Duration::from_millis(self.config.log_cleanup_interval_ms),
            move || {
                let manager = manager.clone();
                async move {
                    manager.cleanup_logs().await;
                }
            },
        );

        if self.config.enable_registry {
            self.registry.start().await?;
            *self.publisher.write() = Some(Arc::new(TopicPublisher::start(self.registry.clone())));
        }

        Ok(())
    }

    /// Announce the broker and its topics, release the startup barrier, and
    /// start the flush scheduler.
    pub async fn startup(self: &Arc<Self>) -> Result<()> {
        if self.config.enable_registry {
            self.registry.register_broker().await?;
            for topic in self.all_topics() {
                self.publish_topic(&topic);
            }
            if let Some((tx, _)) = &self.startup {
                let _ = tx.send(true);
            }
        }

        info!(
            rate_ms = self.config.flush_scheduler_interval_ms,
            overrides = ?self.config.flush_interval_ms_map,
            "Starting log flusher"
        );
        let manager = Arc::clone(self);
        let rate = Duration::from_millis(self.config.flush_scheduler_interval_ms);
        self.flush_scheduler
            .schedule_with_rate("log-flusher", rate, rate, move || {
                let manager = manager.clone();
                async move {
                    manager.flush_dirty_logs().await;
                }
            });
        Ok(())
    }

    /// Quiesce the flush scheduler, close every log, and stop the registry
    /// publisher. Retention stays with the externally supplied scheduler,
    /// whose owner shuts it down.
    pub async fn close(&self) -> Result<()> {
        self.flush_scheduler.shutdown().await;

        for log in self.all_logs() {
            if let Err(e) = log.close() {
                error!(log = %log.name(), error = %e, "Error closing log");
            }
        }

        if self.config.enable_registry {
            let publisher = self.publisher.write().take();
            if let Some(publisher) = publisher {
                publisher.shutdown().await;
            }
            if let Err(e) = self.registry.close().await {
                error!(error = %e, "Error closing registry client");
            }
        }

        info!("Log manager closed");
        Ok(())
    }

    /// Get the log for `(topic, partition)` if it exists.
    ///
    /// Validates partition bounds first; see [`SkiffError::InvalidPartition`].
    pub async fn get_log(&self, topic: &str, partition: i32) -> Result<Option<Arc<Log>>> {
        self.await_startup().await;
        self.check_topic_partition(topic, partition)?;
        Ok(self
            .logs
            .get(topic)
            .and_then(|parts| parts.get(&partition).map(|log| log.clone())))
    }

    /// Get the log for `(topic, partition)`, creating it if absent.
    ///
    /// Concurrent callers for the same pair all receive the same instance;
    /// at most one log is constructed and losing drafts are closed without
    /// ever being observable.
    pub async fn get_or_create_log(&self, topic: &str, partition: i32) -> Result<Arc<Log>> {
        self.await_startup().await;
        self.check_topic_partition(topic, partition)?;

        let (parts, first_ever_topic) = self.partition_map(topic);

        let log = match parts.get(&partition).map(|log| log.clone()) {
            Some(log) => log,
            None => {
                let draft = {
                    let _guard = self.create_lock.lock();
                    match parts.get(&partition) {
                        Some(existing) => existing.clone(),
                        None => Arc::new(self.create_log(topic, partition)?),
                    }
                };
                match parts.entry(partition) {
                    Entry::Occupied(entry) => {
                        let winner = entry.get().clone();
                        if !Arc::ptr_eq(&winner, &draft) {
                            // lost the creation race; release the draft
                            if let Err(e) = draft.close() {
                                debug!(log = %draft.name(), error = %e, "Error closing draft log");
                            }
                        }
                        winner
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(draft.clone());
                        info!(log = %draft.name(), "Created log");
                        draft
                    }
                }
            }
        };

        if first_ever_topic {
            self.publish_topic(topic);
        }

        Ok(log)
    }

    /// Pick a random partition for `topic`, uniform over its partition count.
    pub fn choose_partition(&self, topic: &str) -> i32 {
        rand::thread_rng().gen_range(0..self.partition_count(topic))
    }

    /// Answer an offset lookup, or the empty response when the log is absent.
    pub async fn get_offsets(&self, request: &OffsetRequest) -> Result<Vec<i64>> {
        match self.get_log(&request.topic, request.partition).await? {
            Some(log) => Ok(log.offsets_before(request)),
            None => Ok(Log::empty_offsets(request)),
        }
    }

    /// Per-topic partition count overrides
    pub fn topic_partitions_map(&self) -> &HashMap<String, i32> {
        &self.config.topic_partitions_map
    }

    /// Every topic currently in the registry, order unspecified
    pub fn all_topics(&self) -> Vec<String> {
        self.logs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of every log across all topics and partitions
    pub fn all_logs(&self) -> Vec<Arc<Log>> {
        self.logs
            .iter()
            .flat_map(|parts| {
                parts
                    .value()
                    .iter()
                    .map(|log| log.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub(crate) fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub(crate) fn retention_ms(&self, topic: &str) -> u64 {
        self.retention_ms_map
            .get(topic)
            .copied()
            .unwrap_or(self.config.log_cleanup_default_age_ms)
    }

    /// Number of partitions configured for `topic`
    fn partition_count(&self, topic: &str) -> i32 {
        self.config
            .topic_partitions_map
            .get(topic)
            .copied()
            .unwrap_or(self.config.num_partitions)
    }

    fn check_topic_partition(&self, topic: &str, partition: i32) -> Result<()> {
        if topic.is_empty() {
            // an empty topic has an empty partition space
            return Err(SkiffError::InvalidPartition {
                topic: String::new(),
                partition,
                num_partitions: 0,
            });
        }
        let num_partitions = self.partition_count(topic);
        if partition < 0 || partition >= num_partitions {
            warn!(
                topic = %topic,
                partition,
                num_partitions,
                "Rejecting request for out-of-range partition"
            );
            return Err(SkiffError::InvalidPartition {
                topic: topic.to_string(),
                partition,
                num_partitions,
            });
        }
        Ok(())
    }

    /// The inner partition map for `topic`, inserted if absent. The witness
    /// reports whether this call created the topic entry, which drives
    /// registry publication exactly once per topic.
    fn partition_map(&self, topic: &str) -> (Arc<DashMap<i32, Arc<Log>>>, bool) {
        match self.logs.entry(topic.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let parts = Arc::new(DashMap::new());
                entry.insert(parts.clone());
                (parts, true)
            }
        }
    }

    /// Construct a log for a pair that has none. Callers hold the creation
    /// mutex so directory creation cannot race.
    fn create_log(&self, topic: &str, partition: i32) -> Result<Log> {
        let dir = self.log_dir.join(format!("{}-{}", topic, partition));
        Log::create(
            dir,
            topic.to_string(),
            partition,
            self.rolling_strategy()?,
            self.config.flush_interval,
        )
    }

    fn rolling_strategy(&self) -> Result<Arc<dyn RollingStrategy>> {
        self.rolling.read().clone().ok_or_else(|| {
            SkiffError::Config("no rolling strategy installed; call load() first".to_string())
        })
    }

    fn publish_topic(&self, topic: &str) {
        if let Some(publisher) = self.publisher.read().as_ref() {
            publisher.publish(topic);
        }
    }

    /// Suspend until the startup barrier is released. A no-op when registry
    /// integration is disabled; an interrupted wait is logged and treated
    /// as completion.
    async fn await_startup(&self) {
        if let Some((_, rx)) = &self.startup {
            let mut rx = rx.clone();
            let result = rx.wait_for(|released| *released).await;
            if let Err(e) = result {
                warn!(error = %e, "Interrupted while waiting for startup");
            }
        }
    }

    /// One flush scheduler tick: flush every log whose dirty interval has
    /// elapsed. An I/O error here makes durability unverifiable, so by
    /// default the process halts without graceful shutdown.
    pub(crate) async fn flush_dirty_logs(&self) {
        for log in self.all_logs() {
            let since_last_flush = Utc::now().timestamp_millis() - log.last_flushed_time();
            let interval = self
                .config
                .flush_interval_ms_map
                .get(log.topic_name())
                .copied()
                .unwrap_or(self.config.default_flush_interval_ms);
            trace!(
                log = %log.name(),
                interval_ms = interval,
                since_last_flush_ms = since_last_flush,
                "Flush check"
            );
            if since_last_flush < interval as i64 {
                continue;
            }
            match log.flush() {
                Ok(()) => {}
                Err(SkiffError::Io(e)) => {
                    error!(log = %log.name(), error = %e, "I/O error while flushing log");
                    if self.config.halt_on_flush_failure {
                        error!("Halting due to unrecoverable I/O error while flushing logs");
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    error!(log = %log.name(), error = %e, "Error flushing log");
                }
            }
        }
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("log_dir", &self.log_dir)
            .field("topics", &self.logs.len())
            .field("loaded", &self.loaded.load(Ordering::Relaxed))
            .finish()
    }
}
