//! Integration tests for the Skiff log manager
//!
//! These tests exercise the full lifecycle against real directories:
//! loading pre-existing logs, concurrent log creation, flush cadence, and
//! registry integration with the startup barrier.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use skiff::{
    BrokerConfig, LogManager, NoopRegistry, OffsetRequest, RegistryClient, Result, Scheduler,
    SkiffError, LATEST_TIME,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Opt-in log output: `RUST_LOG=skiff=debug cargo test`
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn new_manager(log_dir: &Path, config: BrokerConfig) -> Arc<LogManager> {
    init_logging();
    let config = BrokerConfig {
        log_dir: log_dir.to_path_buf(),
        ..config
    };
    Arc::new(
        LogManager::new(
            config,
            Arc::new(Scheduler::new("test-scheduler")),
            Arc::new(NoopRegistry),
        )
        .unwrap(),
    )
}

/// Pre-populate a log directory with one empty segment file, the way a
/// previous broker run would have left it.
fn seed_log_dir(root: &Path, name: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("00000000000000000000.log"), b"").unwrap();
}

/// Registry stub recording every call for assertions
#[derive(Debug, Default)]
struct RecordingRegistry {
    started: Mutex<bool>,
    broker_registered: Mutex<bool>,
    topics: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

#[async_trait]
impl RegistryClient for RecordingRegistry {
    async fn start(&self) -> Result<()> {
        *self.started.lock() = true;
        Ok(())
    }

    async fn register_broker(&self) -> Result<()> {
        *self.broker_registered.lock() = true;
        Ok(())
    }

    async fn register_topic(&self, topic: &str) -> Result<()> {
        self.topics.lock().push(topic.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

#[tokio::test]
async fn test_load_then_query() {
    let dir = tempdir().unwrap();
    seed_log_dir(dir.path(), "orders-0");
    seed_log_dir(dir.path(), "orders-1");
    seed_log_dir(dir.path(), "events-0");

    let manager = new_manager(
        dir.path(),
        BrokerConfig {
            num_partitions: 2,
            ..Default::default()
        },
    );
    manager.load().await.unwrap();

    assert!(manager.get_log("orders", 0).await.unwrap().is_some());
    assert!(manager.get_log("orders", 1).await.unwrap().is_some());
    assert!(manager.get_log("events", 0).await.unwrap().is_some());
    assert!(manager.get_log("events", 1).await.unwrap().is_none());

    let err = manager.get_log("orders", 2).await.unwrap_err();
    assert!(matches!(err, SkiffError::InvalidPartition { .. }));

    let topics: BTreeSet<String> = manager.all_topics().into_iter().collect();
    let expected: BTreeSet<String> = ["orders", "events"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(topics, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_race_yields_one_log() {
    let dir = tempdir().unwrap();
    let manager = new_manager(dir.path(), BrokerConfig::default());
    manager.load().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.get_or_create_log("new", 0).await.unwrap()
        }));
    }

    let mut logs = Vec::new();
    for handle in handles {
        logs.push(handle.await.unwrap());
    }

    for log in &logs[1..] {
        assert!(Arc::ptr_eq(&logs[0], log), "all callers must see one instance");
    }

    // exactly one directory appeared
    let dirs: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    assert_eq!(dirs.len(), 1);
    assert_eq!(dirs[0].file_name().to_string_lossy(), "new-0");

    // and the winning log is fully usable
    let offset = logs[0].append(Bytes::from("first")).unwrap();
    assert_eq!(offset, 0);
}

#[tokio::test]
async fn test_flush_cadence_respects_overrides() {
    let dir = tempdir().unwrap();
    let mut config = BrokerConfig {
        flush_scheduler_interval_ms: 100,
        default_flush_interval_ms: 1_000,
        ..Default::default()
    };
    config
        .flush_interval_ms_map
        .insert("fast".to_string(), 500);

    let manager = new_manager(dir.path(), config);
    manager.load().await.unwrap();
    manager.startup().await.unwrap();

    let fast = manager.get_or_create_log("fast", 0).await.unwrap();
    let slow = manager.get_or_create_log("slow", 0).await.unwrap();
    fast.append(Bytes::from("f")).unwrap();
    slow.append(Bytes::from("s")).unwrap();

    // sample the flush clocks while the scheduler runs
    let mut fast_times = BTreeSet::new();
    let mut slow_times = BTreeSet::new();
    for _ in 0..24 {
        fast_times.insert(fast.last_flushed_time());
        slow_times.insert(slow.last_flushed_time());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // 1.2s at a 500ms interval: at least two flushes beyond the initial
    // timestamp; the 1000ms topic managed at least one
    assert!(
        fast_times.len() >= 3,
        "fast topic flushed {} times",
        fast_times.len() - 1
    );
    assert!(
        slow_times.len() >= 2,
        "slow topic flushed {} times",
        slow_times.len() - 1
    );
    assert!(fast_times.len() > slow_times.len());

    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_registry_lifecycle_and_barrier() {
    init_logging();
    let dir = tempdir().unwrap();
    seed_log_dir(dir.path(), "preloaded-0");

    let registry = Arc::new(RecordingRegistry::default());
    let config = BrokerConfig {
        log_dir: dir.path().to_path_buf(),
        enable_registry: true,
        ..Default::default()
    };
    let scheduler = Arc::new(Scheduler::new("test-scheduler"));
    let manager = Arc::new(LogManager::new(config, scheduler.clone(), registry.clone()).unwrap());

    manager.load().await.unwrap();
    assert!(*registry.started.lock());

    // traffic-handling calls block until startup releases the barrier
    let blocked = tokio::time::timeout(
        Duration::from_millis(100),
        manager.get_log("preloaded", 0),
    )
    .await;
    assert!(blocked.is_err(), "get_log must wait for startup");

    manager.startup().await.unwrap();
    assert!(*registry.broker_registered.lock());

    let log = tokio::time::timeout(Duration::from_millis(500), manager.get_log("preloaded", 0))
        .await
        .unwrap()
        .unwrap();
    assert!(log.is_some());

    // loaded topics were announced, and a new topic is announced once
    manager.get_or_create_log("fresh", 0).await.unwrap();
    manager.get_or_create_log("fresh", 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let topics = registry.topics.lock();
        assert!(topics.contains(&"preloaded".to_string()));
        assert_eq!(topics.iter().filter(|t| *t == "fresh").count(), 1);
    }

    manager.close().await.unwrap();
    assert!(*registry.closed.lock());
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_startup_close_leaves_disk_untouched() {
    let dir = tempdir().unwrap();
    seed_log_dir(dir.path(), "orders-0");
    seed_log_dir(dir.path(), "events-3");

    let snapshot = |root: &Path| -> BTreeSet<String> {
        let mut files = BTreeSet::new();
        for entry in walk(root) {
            files.insert(entry.strip_prefix(root).unwrap().display().to_string());
        }
        files
    };

    fn walk(root: &Path) -> Vec<std::path::PathBuf> {
        let mut out = Vec::new();
        for entry in fs::read_dir(root).unwrap().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                out.extend(walk(&path));
            }
            out.push(path);
        }
        out
    }

    let config = BrokerConfig {
        num_partitions: 4,
        ..Default::default()
    };
    let before = snapshot(dir.path());

    let manager = new_manager(dir.path(), config);
    manager.load().await.unwrap();
    manager.startup().await.unwrap();
    manager.close().await.unwrap();

    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn test_offsets_end_to_end() {
    let dir = tempdir().unwrap();
    let manager = new_manager(dir.path(), BrokerConfig::default());
    manager.load().await.unwrap();

    let log = manager.get_or_create_log("metrics", 0).await.unwrap();
    for i in 0..5 {
        log.append(Bytes::from(format!("m{i}"))).unwrap();
    }
    log.flush().unwrap();

    let offsets = manager
        .get_offsets(&OffsetRequest {
            topic: "metrics".to_string(),
            partition: 0,
            time: LATEST_TIME,
            max_num_offsets: 2,
        })
        .await
        .unwrap();
    assert_eq!(offsets.first().copied(), Some(5));

    // a partition that exists in config but has no log yet
    let empty = manager
        .get_offsets(&OffsetRequest {
            topic: "unwritten".to_string(),
            partition: 0,
            time: LATEST_TIME,
            max_num_offsets: 2,
        })
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_restart_recovers_registry_from_disk() {
    let dir = tempdir().unwrap();

    {
        let manager = new_manager(dir.path(), BrokerConfig::default());
        manager.load().await.unwrap();
        let log = manager.get_or_create_log("durable", 0).await.unwrap();
        for i in 0..20 {
            log.append(Bytes::from(format!("record-{i}"))).unwrap();
        }
        manager.close().await.unwrap();
    }

    // a second manager over the same directory sees the same data
    let manager = new_manager(dir.path(), BrokerConfig::default());
    manager.load().await.unwrap();

    let log = manager.get_log("durable", 0).await.unwrap().unwrap();
    assert_eq!(log.log_end_offset(), 20);
    let records = log.read_from(18, 10).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], (18, Bytes::from("record-18")));

    // appends continue where the previous run stopped
    assert_eq!(log.append(Bytes::from("more")).unwrap(), 20);
}

#[tokio::test]
async fn test_registry_disabled_skips_announcements() {
    init_logging();
    let dir = tempdir().unwrap();

    // a recording registry that must never be contacted
    let registry = Arc::new(RecordingRegistry::default());
    let config = BrokerConfig {
        log_dir: dir.path().to_path_buf(),
        enable_registry: false,
        ..Default::default()
    };
    let scheduler = Arc::new(Scheduler::new("test-scheduler"));
    let manager = Arc::new(LogManager::new(config, scheduler.clone(), registry.clone()).unwrap());

    manager.load().await.unwrap();
    manager.startup().await.unwrap();
    manager.get_or_create_log("silent", 0).await.unwrap();
    manager.close().await.unwrap();

    assert!(!*registry.started.lock());
    assert!(!*registry.broker_registered.lock());
    assert!(registry.topics.lock().is_empty());
    assert!(!*registry.closed.lock());
    scheduler.shutdown().await;
}
