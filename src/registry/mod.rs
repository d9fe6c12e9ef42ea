//! External registry integration
//!
//! Brokers advertise themselves and their topics to an external coordination
//! service so clients can discover them. The log manager talks to that
//! service through the [`RegistryClient`] trait and works fully against the
//! [`NoopRegistry`] when integration is disabled.
//!
//! Topic announcements are decoupled from the produce path by
//! [`TopicPublisher`]: creating a topic enqueues its name on an unbounded
//! queue and a single background worker drains it, so producers never wait
//! on the registry. Publication is best effort; the registry treats
//! registration as idempotent, and a failed announcement is logged without
//! being re-enqueued.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Client for the external broker/topic registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Establish the session with the registry service
    async fn start(&self) -> Result<()>;

    /// Advertise this broker
    async fn register_broker(&self) -> Result<()>;

    /// Advertise one topic hosted by this broker. Idempotent on the
    /// registry side.
    async fn register_topic(&self, topic: &str) -> Result<()>;

    /// Tear down the session
    async fn close(&self) -> Result<()>;
}

/// A registry client that does nothing. The log manager behaves identically
/// with this implementation and a live one, minus the announcements.
#[derive(Debug, Default)]
pub struct NoopRegistry;

#[async_trait]
impl RegistryClient for NoopRegistry {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn register_broker(&self) -> Result<()> {
        Ok(())
    }

    async fn register_topic(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Background worker announcing newly created topics to the registry.
///
/// An empty string on the queue is a wakeup token used during shutdown and
/// is never forwarded to the registry.
pub struct TopicPublisher {
    tx: mpsc::UnboundedSender<String>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TopicPublisher {
    /// Spawn the worker draining the publication queue.
    pub fn start(registry: Arc<dyn RegistryClient>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let worker = tokio::spawn(async move {
            while !stop_flag.load(Ordering::Relaxed) {
                match rx.recv().await {
                    Some(topic) => {
                        if topic.is_empty() {
                            continue; // wakeup token
                        }
                        if let Err(e) = registry.register_topic(&topic).await {
                            error!(topic = %topic, error = %e, "Failed to register topic");
                        } else {
                            debug!(topic = %topic, "Registered topic");
                        }
                    }
                    None => break,
                }
            }
            info!("Topic publisher stopped");
        });

        Self {
            tx,
            stop,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a topic for announcement. Never blocks; the queue is
    /// unbounded and the send only fails once the worker is gone.
    pub fn publish(&self, topic: &str) {
        if self.tx.send(topic.to_string()).is_err() {
            debug!(topic = %topic, "Publisher already stopped, dropping announcement");
        }
    }

    /// Stop the worker: raise the stop flag, wake the queue with an empty
    /// token, and join.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.tx.send(String::new());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for TopicPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicPublisher")
            .field("stopped", &self.stop.load(Ordering::Relaxed))
            .finish()
    }
}
