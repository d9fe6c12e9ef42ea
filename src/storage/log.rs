//! Per-(topic, partition) append log
//!
//! A [`Log`] owns one directory of segment files and presents an append-only
//! sequence of records with monotonic logical offsets. The newest segment is
//! active and open for appends; older segments are sealed. All structural
//! mutation (append, roll, flush, retention marking) happens under a single
//! `RwLock` per log, so ordering within a partition is total while separate
//! partitions never contend.
//!
//! # Lock Ordering
//!
//! The per-log lock is a leaf: nothing is acquired while it is held. The
//! manager's creation mutex is released before any log lock is taken.

use crate::error::Result;
use crate::storage::rolling::RollingStrategy;
use crate::storage::segment::{parse_segment_filename, segment_filename, LogSegment};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Sentinel time meaning "the latest available offset"
pub const LATEST_TIME: i64 = -1;

/// Sentinel time meaning "the earliest available offset"
pub const EARLIEST_TIME: i64 = -2;

/// An offset lookup query against one (topic, partition)
#[derive(Debug, Clone)]
pub struct OffsetRequest {
    pub topic: String,
    pub partition: i32,
    /// Target time in epoch milliseconds, or one of [`LATEST_TIME`] /
    /// [`EARLIEST_TIME`]
    pub time: i64,
    pub max_num_offsets: usize,
}

struct LogInner {
    sealed: VecDeque<LogSegment>,
    active: LogSegment,
}

/// A handle to one partition's append-only segment sequence
pub struct Log {
    topic: String,
    partition: i32,
    name: String,
    dir: PathBuf,
    flush_message_interval: u32,
    strategy: Arc<dyn RollingStrategy>,
    inner: RwLock<LogInner>,
    last_flushed: AtomicI64,
    unflushed: AtomicU32,
}

impl Log {
    /// Open the log stored in `dir`, creating an initial segment when the
    /// directory is empty. `recover` controls whether a torn active-segment
    /// tail is truncated or treated as an error.
    pub fn open(
        dir: PathBuf,
        topic: String,
        partition: i32,
        strategy: Arc<dyn RollingStrategy>,
        flush_message_interval: u32,
        recover: bool,
    ) -> Result<Self> {
        let mut bases: Vec<i64> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(parse_segment_filename)
            })
            .collect();
        bases.sort_unstable();

        let mut sealed = VecDeque::with_capacity(bases.len());
        let active = match bases.last().copied() {
            None => LogSegment::create(&dir, 0)?,
            Some(last_base) => {
                for base in &bases[..bases.len() - 1] {
                    let path = dir.join(segment_filename(*base));
                    sealed.push_back(LogSegment::open_sealed(path, *base)?);
                }
                let path = dir.join(segment_filename(last_base));
                LogSegment::open_active(path, last_base, recover)?
            }
        };

        debug!(
            topic = %topic,
            partition,
            segments = sealed.len() + 1,
            next_offset = active.next_offset(),
            "Opened log"
        );

        let name = format!("{}-{}", topic, partition);
        Ok(Self {
            topic,
            partition,
            name,
            dir,
            flush_message_interval,
            strategy,
            inner: RwLock::new(LogInner { sealed, active }),
            last_flushed: AtomicI64::new(Utc::now().timestamp_millis()),
            unflushed: AtomicU32::new(0),
        })
    }

    /// Create the log directory if needed and open a fresh log in it.
    pub fn create(
        dir: PathBuf,
        topic: String,
        partition: i32,
        strategy: Arc<dyn RollingStrategy>,
        flush_message_interval: u32,
    ) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Self::open(dir, topic, partition, strategy, flush_message_interval, false)
    }

    /// Append one record and return its logical offset.
    ///
    /// Rolls the active segment first when the rolling strategy says so, and
    /// flushes once the unflushed-message count reaches the configured
    /// trigger.
    pub fn append(&self, payload: Bytes) -> Result<i64> {
        let mut inner = self.inner.write();

        if self.strategy.should_roll(&inner.active) {
            self.roll(&mut inner)?;
        }

        let offset = inner.active.next_offset();
        inner.active.append(&payload)?;

        let unflushed = self.unflushed.fetch_add(1, Ordering::Relaxed) + 1;
        if unflushed >= self.flush_message_interval {
            self.flush_locked(&mut inner)?;
        }

        Ok(offset)
    }

    /// Force all buffered appends to durable storage.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut LogInner) -> Result<()> {
        inner.active.flush()?;
        self.unflushed.store(0, Ordering::Relaxed);
        self.last_flushed
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        trace!(log = %self.name, "Flushed log");
        Ok(())
    }

    fn roll(&self, inner: &mut LogInner) -> Result<()> {
        inner.active.seal()?;
        let next = LogSegment::create(&self.dir, inner.active.next_offset())?;
        let sealed = std::mem::replace(&mut inner.active, next);
        info!(
            log = %self.name,
            base_offset = inner.active.base_offset(),
            sealed_size = sealed.size(),
            "Rolled new segment"
        );
        inner.sealed.push_back(sealed);
        Ok(())
    }

    /// Aggregate size of all segments in bytes
    pub fn size(&self) -> u64 {
        let inner = self.inner.read();
        inner.sealed.iter().map(LogSegment::size).sum::<u64>() + inner.active.size()
    }

    /// Number of segment files, the active one included
    pub fn segment_count(&self) -> usize {
        self.inner.read().sealed.len() + 1
    }

    /// Offset that the next appended record will receive
    pub fn log_end_offset(&self) -> i64 {
        self.inner.read().active.next_offset()
    }

    /// Epoch milliseconds of the last completed flush
    pub fn last_flushed_time(&self) -> i64 {
        self.last_flushed.load(Ordering::Relaxed)
    }

    pub fn topic_name(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// The `topic-partition` name, equal to the directory name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Walk sealed segments oldest-first, offering each to `filter`, and
    /// detach the accepted prefix. Iteration stops at the first rejection.
    /// The active segment is never offered. Returned segments are marked
    /// deleted but not yet unlinked; the caller owns their disposal.
    pub fn mark_deleted_while<F>(&self, mut filter: F) -> Vec<LogSegment>
    where
        F: FnMut(&LogSegment) -> bool,
    {
        let mut inner = self.inner.write();
        let mut marked = Vec::new();
        loop {
            let accepted = match inner.sealed.front() {
                Some(segment) => filter(segment),
                None => break,
            };
            if !accepted {
                break;
            }
            if let Some(mut segment) = inner.sealed.pop_front() {
                segment.mark_deleted();
                marked.push(segment);
            }
        }
        marked
    }

    /// Answer an offset lookup: the segment base offsets (plus the log end
    /// offset when the active segment holds data) whose last-modified time
    /// is at or before the requested time, newest first, capped at
    /// `max_num_offsets`. [`LATEST_TIME`] and [`EARLIEST_TIME`] short-cut
    /// the time comparison.
    pub fn offsets_before(&self, request: &OffsetRequest) -> Vec<i64> {
        let inner = self.inner.read();

        let mut candidates: Vec<(i64, i64)> = inner
            .sealed
            .iter()
            .map(|s| (s.base_offset(), s.last_modified()))
            .collect();
        candidates.push((inner.active.base_offset(), inner.active.last_modified()));
        if inner.active.size() > 0 {
            candidates.push((
                inner.active.next_offset(),
                Utc::now().timestamp_millis(),
            ));
        }

        let start_index = match request.time {
            LATEST_TIME => Some(candidates.len() - 1),
            EARLIEST_TIME => Some(0),
            time => candidates.iter().rposition(|(_, modified)| *modified <= time),
        };

        match start_index {
            None => Vec::new(),
            Some(start) => {
                let take = request.max_num_offsets.min(start + 1);
                (0..take).map(|j| candidates[start - j].0).collect()
            }
        }
    }

    /// The lookup answer for a log that does not exist
    pub fn empty_offsets(_request: &OffsetRequest) -> Vec<i64> {
        Vec::new()
    }

    /// Read up to `max_records` records starting at `start_offset`,
    /// returning `(offset, payload)` pairs. Buffered appends are flushed
    /// first so the read observes everything appended so far.
    pub fn read_from(&self, start_offset: i64, max_records: usize) -> Result<Vec<(i64, Bytes)>> {
        let mut inner = self.inner.write();
        self.flush_locked(&mut inner)?;

        let mut out = Vec::new();
        let active_base = inner.active.base_offset();

        // each sealed segment ends where its successor begins
        let ends: Vec<i64> = inner
            .sealed
            .iter()
            .skip(1)
            .map(LogSegment::base_offset)
            .chain(std::iter::once(active_base))
            .collect();

        for (segment, end) in inner
            .sealed
            .iter()
            .zip(ends)
            .chain(std::iter::once((&inner.active, inner.active.next_offset())))
        {
            if out.len() >= max_records {
                break;
            }
            if end <= start_offset {
                continue;
            }
            for (i, payload) in segment.read_records()?.into_iter().enumerate() {
                let offset = segment.base_offset() + i as i64;
                if offset < start_offset {
                    continue;
                }
                out.push((offset, payload));
                if out.len() >= max_records {
                    break;
                }
            }
        }

        Ok(out)
    }

    /// Flush and release the active segment's file handle.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.flush_locked(&mut inner)?;
        inner.active.close()?;
        debug!(log = %self.name, "Closed log");
        Ok(())
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish()
    }
}
