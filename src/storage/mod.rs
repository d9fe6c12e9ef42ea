//! Storage engine for Skiff
//!
//! The storage engine owns the on-disk collection of per-(topic, partition)
//! append logs. A [`LogManager`] maps topics and partitions to [`Log`]
//! instances; each log is a directory of [`LogSegment`] files rolled by a
//! [`RollingStrategy`] and reaped by the retention sweep.

pub mod log;
pub mod manager;
pub mod retention;
pub mod rolling;
pub mod segment;

pub use log::{Log, OffsetRequest, EARLIEST_TIME, LATEST_TIME};
pub use manager::{parse_log_dir_name, LogManager};
pub use rolling::{FixedSizeRollingStrategy, RollingStrategy};
pub use segment::{parse_segment_filename, segment_filename, LogSegment};
