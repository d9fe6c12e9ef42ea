#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Skiff
//!
//! Skiff is the log-manager core of a topic-partitioned, append-only commit
//! log broker. It owns the on-disk logs of a single broker: discovery and
//! recovery at startup, demand-driven log creation, periodic flushing of
//! dirty logs, and retention by age and aggregate size. Topic announcements
//! to an external registry run in the background and never block producers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use skiff::{BrokerConfig, LogManager, NoopRegistry, Scheduler};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # async fn run() -> skiff::Result<()> {
//! let config = BrokerConfig::default();
//! let scheduler = Arc::new(Scheduler::new("broker"));
//! let manager = Arc::new(LogManager::new(
//!     config,
//!     scheduler.clone(),
//!     Arc::new(NoopRegistry),
//! )?);
//!
//! manager.load().await?;
//! manager.startup().await?;
//!
//! let log = manager.get_or_create_log("orders", 0).await?;
//! let offset = log.append(Bytes::from("payload"))?;
//! assert_eq!(offset, 0);
//!
//! manager.close().await?;
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout on disk
//!
//! Under the configured `log_dir`, one subdirectory per (topic, partition),
//! named `<topic>-<partition>`; inside each, segment files named by the
//! 20-digit zero-padded base offset. The rightmost `-` in a directory name
//! separates the partition index, so topic names may contain `-`.

pub mod config;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod storage;

pub use config::BrokerConfig;
pub use error::{Result, SkiffError};
pub use registry::{NoopRegistry, RegistryClient, TopicPublisher};
pub use scheduler::Scheduler;
pub use storage::{
    FixedSizeRollingStrategy, Log, LogManager, LogSegment, OffsetRequest, RollingStrategy,
    EARLIEST_TIME, LATEST_TIME,
};
