//! Retention enforcement for the log manager
//!
//! Each sweep walks every log and applies age-based cleanup, then size-based
//! cleanup. Segments are first detached from their log (marked), then closed
//! and unlinked; a failed unlink never stops the remaining deletions. The
//! active segment is never eligible.

use crate::storage::log::Log;
use crate::storage::manager::LogManager;
use crate::storage::segment::LogSegment;
use chrono::Utc;
use std::fs;
use std::sync::Arc;
use tracing::{info, trace, warn};

impl LogManager {
    /// One retention sweep over every log. Errors are isolated per segment;
    /// the sweep itself never fails.
    pub(crate) async fn cleanup_logs(&self) {
        trace!("Beginning log cleanup");
        let start_ms = Utc::now().timestamp_millis();
        let mut total = 0usize;
        for log in self.all_logs() {
            total += self.cleanup_expired_segments(&log) + self.cleanup_segments_to_maintain_size(&log);
        }
        let elapsed_ms = Utc::now().timestamp_millis() - start_ms;
        if total > 0 {
            info!(deleted = total, elapsed_ms, "Log cleanup completed");
        } else {
            trace!(deleted = total, elapsed_ms, "Log cleanup completed");
        }
    }

    /// Delete segments older than the topic's retention threshold.
    fn cleanup_expired_segments(&self, log: &Arc<Log>) -> usize {
        let threshold = self.retention_ms(log.topic_name()) as i64;
        let start_ms = Utc::now().timestamp_millis();
        let expired =
            log.mark_deleted_while(|segment| start_ms - segment.last_modified() > threshold);
        self.delete_segments(log, expired)
    }

    /// Delete the oldest segments until the log fits its size quota.
    ///
    /// The filter keeps a running `diff` of excess bytes and accepts a
    /// segment only while the log would still be over quota after removing
    /// it, so deletions stop exactly when the log fits. Relies on the
    /// oldest-to-newest order of `mark_deleted_while`.
    fn cleanup_segments_to_maintain_size(&self, log: &Arc<Log>) -> usize {
        let retention_size = self.config().log_retention_size;
        if retention_size < 0 || (log.size() as i64) < retention_size {
            return 0;
        }
        let mut diff = log.size() as i64 - retention_size;
        let marked = log.mark_deleted_while(|segment| {
            diff -= segment.size() as i64;
            diff >= 0
        });
        self.delete_segments(log, marked)
    }

    /// Close and unlink marked segments, counting successful unlinks. Each
    /// deletion is attempted independently.
    fn delete_segments(&self, log: &Arc<Log>, segments: Vec<LogSegment>) -> usize {
        let mut total = 0usize;
        for mut segment in segments {
            if let Err(e) = segment.close() {
                warn!(
                    log = %log.name(),
                    path = %segment.path().display(),
                    error = %e,
                    "Error closing segment before deletion"
                );
            }
            let deleted = match fs::remove_file(segment.path()) {
                Ok(()) => {
                    total += 1;
                    true
                }
                Err(e) => {
                    warn!(
                        log = %log.name(),
                        path = %segment.path().display(),
                        error = %e,
                        "Failed to delete segment file"
                    );
                    false
                }
            };
            warn!(
                log = %log.name(),
                path = %segment.path().display(),
                success = deleted,
                "Deleted log segment"
            );
        }
        total
    }
}
