//! Segment rolling strategies
//!
//! A rolling strategy decides when a log must seal its active segment and
//! begin a new one. The decision is consulted on every append, before the
//! record is written. Strategies are injected into the log manager before
//! `load`; when none is provided, [`FixedSizeRollingStrategy`] with the
//! configured segment size is installed.

use crate::storage::segment::LogSegment;

/// Policy deciding whether the active segment should be rolled
pub trait RollingStrategy: Send + Sync {
    /// True when `active` should be sealed and a new segment started
    fn should_roll(&self, active: &LogSegment) -> bool;
}

/// Roll once the active segment reaches a fixed byte size
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeRollingStrategy {
    max_bytes: u64,
}

impl FixedSizeRollingStrategy {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

impl RollingStrategy for FixedSizeRollingStrategy {
    fn should_roll(&self, active: &LogSegment) -> bool {
        active.size() >= self.max_bytes
    }
}
