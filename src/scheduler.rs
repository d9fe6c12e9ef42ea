//! Periodic background task scheduler
//!
//! [`Scheduler`] owns a set of named periodic tasks and a shared stop flag.
//! The log manager uses one externally supplied scheduler for the retention
//! sweep and a dedicated single-task scheduler for the flush loop.
//!
//! Shutdown sets the stop flag, then gives each task a short grace period to
//! finish an in-flight run before aborting it. Long-interval tasks would
//! otherwise keep the process alive for up to a full period.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Grace period granted to an in-flight task run during shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A handle-owning periodic task runner
pub struct Scheduler {
    name: &'static str,
    stop: Arc<AtomicBool>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stop: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Schedule `task` to run after `initial_delay`, then once per `period`.
    ///
    /// The task factory is invoked once per tick; a tick that outlives its
    /// period delays subsequent ticks rather than running concurrently.
    pub fn schedule_with_rate<F, Fut>(
        &self,
        task_name: &'static str,
        initial_delay: Duration,
        period: Duration,
        mut task: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                task().await;
            }
            trace!(task = task_name, "Periodic task stopped");
        });
        debug!(
            scheduler = self.name,
            task = task_name,
            initial_delay_ms = initial_delay.as_millis() as u64,
            period_ms = period.as_millis() as u64,
            "Scheduled periodic task"
        );
        self.tasks.lock().push((task_name, handle));
    }

    /// True once shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Stop all tasks, waiting briefly for in-flight runs to finish.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (task_name, mut handle) in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(_) => debug!(scheduler = self.name, task = task_name, "Task finished"),
                Err(_) => {
                    // Still parked on a long tick; nothing in-flight to lose.
                    warn!(
                        scheduler = self.name,
                        task = task_name,
                        "Task did not stop within grace period, aborting"
                    );
                    handle.abort();
                }
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("stopped", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_task_fires_repeatedly() {
        let scheduler = Scheduler::new("test");
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        scheduler.schedule_with_rate(
            "counter",
            Duration::from_millis(0),
            Duration::from_millis(20),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(110)).await;
        scheduler.shutdown().await;
        let fired = count.load(Ordering::Relaxed);
        assert!(fired >= 3, "expected at least 3 ticks, got {fired}");

        // no further ticks after shutdown
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::Relaxed), fired);
    }

    #[tokio::test]
    async fn test_initial_delay_holds_back_first_tick() {
        let scheduler = Scheduler::new("test");
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        scheduler.schedule_with_rate(
            "delayed",
            Duration::from_millis(200),
            Duration::from_millis(20),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::Relaxed), 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_parked_task() {
        let scheduler = Scheduler::new("test");
        scheduler.schedule_with_rate(
            "slow",
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            || async {},
        );
        // must return promptly even though the task sleeps for an hour
        tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
            .await
            .unwrap();
    }
}
