//! Persistent task queue.
//!
//! The `task_queue` table is the source of truth; a bounded in-memory
//! channel is only a fast path that wakes idle workers.
//!
//! ```text
//!  enqueue ──▶ INSERT waiting ──▶ try_send ─┐
//!                                           ▼
//!  poller (every N s) ── SELECT waiting ──▶ channel ──▶ dequeue ──▶ claim
//! ```
//!
//! Ids can reach the channel more than once (enqueue plus poller, or two
//! poller ticks). [`TaskQueueService::dequeue`] hands out an id only after
//! the conditional `waiting → processing` update succeeds, so duplicates
//! and stale ids are dropped there.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use knowledge_hub_core::store::QueueStore;

use crate::config::QueueConfig;

/// Queue tuning values.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub channel_capacity: usize,
    pub poll_interval: Duration,
    pub poll_batch: usize,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            channel_capacity: config.channel_capacity,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            poll_batch: config.poll_batch,
        }
    }
}

pub struct TaskQueueService {
    store: Arc<dyn QueueStore>,
    sender: mpsc::Sender<String>,
    receiver: Mutex<mpsc::Receiver<String>>,
    shutdown: watch::Sender<bool>,
    settings: QueueSettings,
}

impl TaskQueueService {
    pub fn new(store: Arc<dyn QueueStore>, settings: QueueSettings) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(settings.channel_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            store,
            sender,
            receiver: Mutex::new(receiver),
            shutdown,
            settings,
        })
    }

    /// Durably enqueue a task and nudge an idle worker.
    ///
    /// Returns `true` if a new queue row was written, `false` if the task
    /// already had an active entry. Only the durable write can fail.
    pub async fn enqueue(&self, task_id: &str, priority: i64) -> Result<bool> {
        let inserted = self.store.insert_waiting(task_id, priority).await?;
        if !inserted {
            tracing::debug!(task_id, "task already queued");
        }
        self.notify(task_id);
        Ok(inserted)
    }

    fn notify(&self, task_id: &str) -> bool {
        match self.sender.try_send(task_id.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(task_id, "queue channel full, poller will pick the task up");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Wait for the next task this caller owns.
    ///
    /// Returns `None` after [`shutdown`](Self::shutdown).
    pub async fn dequeue(&self) -> Option<String> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let next = {
                let mut rx = self.receiver.lock().await;
                if *shutdown.borrow_and_update() {
                    return None;
                }
                tokio::select! {
                    id = rx.recv() => id,
                    _ = shutdown.changed() => None,
                }
            };
            let task_id = next?;

            match self.store.claim(&task_id).await {
                Ok(true) => return Some(task_id),
                Ok(false) => {
                    tracing::debug!(task_id = %task_id, "skipping stale queue signal");
                }
                Err(e) => {
                    // Entry stays waiting; the poller will offer it again.
                    tracing::warn!(task_id = %task_id, error = %e, "failed to claim task");
                }
            }
        }
    }

    /// Record the final queue status of a claimed task. Not retried.
    pub async fn complete(&self, task_id: &str, success: bool) -> Result<()> {
        if !self.store.finish(task_id, success).await? {
            tracing::warn!(task_id, "completed a task that was not marked processing");
        }
        Ok(())
    }

    /// Push one batch of waiting task ids into the channel.
    ///
    /// Returns how many were sent. Stops early when the channel is full;
    /// the remainder stays waiting for the next tick.
    pub async fn poll_once(&self) -> Result<usize> {
        let waiting = self.store.waiting(self.settings.poll_batch).await?;
        let mut sent = 0;
        for task_id in &waiting {
            if !self.notify(task_id) {
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            tracing::debug!(sent, waiting = waiting.len(), "poller re-offered waiting tasks");
        }
        Ok(sent)
    }

    /// Run [`poll_once`](Self::poll_once) every poll interval until shutdown.
    pub fn spawn_poller(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.settings.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = queue.poll_once().await {
                            tracing::warn!(error = %e, "queue poll failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("queue poller stopped");
        })
    }

    /// Hand a claimed task back to the queue without notifying workers.
    ///
    /// The poller offers it again on its next tick. Returns whether an
    /// entry was moved.
    pub async fn retry(&self, task_id: &str) -> Result<bool> {
        Ok(self.store.requeue_processing(task_id).await? > 0)
    }

    /// Return a task's leftover `processing` entry to `waiting`.
    ///
    /// Only safe before any worker is running.
    pub async fn requeue_stale(&self, task_id: &str) -> Result<u64> {
        self.store.requeue_processing(task_id).await
    }

    /// Stop the poller and release all workers blocked in `dequeue`.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_hub_core::models::QueueStatus;
    use knowledge_hub_core::store::memory::InMemoryStore;

    fn settings(capacity: usize) -> QueueSettings {
        QueueSettings {
            channel_capacity: capacity,
            poll_interval: Duration::from_millis(20),
            poll_batch: 20,
        }
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_claims() {
        let store = Arc::new(InMemoryStore::new());
        let queue = TaskQueueService::new(store.clone(), settings(10));

        assert!(queue.enqueue("t1", 0).await.unwrap());
        assert_eq!(queue.dequeue().await.as_deref(), Some("t1"));

        let entries = store.entries_for("t1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, QueueStatus::Processing);
        assert!(entries[0].started_at.is_some());

        queue.complete("t1", true).await.unwrap();
        let entries = store.entries_for("t1").await.unwrap();
        assert_eq!(entries[0].status, QueueStatus::Completed);
        assert!(entries[0].ended_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_signals_hand_out_task_once() {
        let store = Arc::new(InMemoryStore::new());
        let queue = TaskQueueService::new(store.clone(), settings(10));

        queue.enqueue("t1", 0).await.unwrap();
        assert!(!queue.enqueue("t1", 0).await.unwrap());
        queue.poll_once().await.unwrap();

        assert_eq!(queue.dequeue().await.as_deref(), Some("t1"));

        // The remaining signals are stale; dequeue must keep waiting.
        let second = tokio::time::timeout(Duration::from_millis(100), queue.dequeue()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_full_channel_is_not_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let queue = TaskQueueService::new(store.clone(), settings(1));

        queue.enqueue("t1", 0).await.unwrap();
        queue.enqueue("t2", 0).await.unwrap();
        assert_eq!(store.waiting(10).await.unwrap().len(), 2);

        assert_eq!(queue.dequeue().await.as_deref(), Some("t1"));
        // t2 never made it into the channel; the poller delivers it.
        assert_eq!(queue.poll_once().await.unwrap(), 1);
        assert_eq!(queue.dequeue().await.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_poller_delivers_durable_entries() {
        let store = Arc::new(InMemoryStore::new());
        // Written by another process: no channel signal.
        store.insert_waiting("t1", 0).await.unwrap();

        let queue = TaskQueueService::new(store.clone(), settings(10));
        let poller = queue.spawn_poller();

        let got = tokio::time::timeout(Duration::from_secs(2), queue.dequeue())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("t1"));

        queue.shutdown();
        poller.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiting_workers() {
        let store = Arc::new(InMemoryStore::new());
        let queue = TaskQueueService::new(store, settings(10));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = Arc::clone(&queue);
                tokio::spawn(async move { q.dequeue().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();

        for w in waiters {
            let got = tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .unwrap()
                .unwrap();
            assert!(got.is_none());
        }
    }

    #[tokio::test]
    async fn test_requeue_stale_claim() {
        let store = Arc::new(InMemoryStore::new());
        let queue = TaskQueueService::new(store.clone(), settings(10));
        queue.enqueue("t1", 0).await.unwrap();
        assert_eq!(queue.dequeue().await.as_deref(), Some("t1"));

        // Simulated crash: the claim is never completed.
        assert_eq!(queue.requeue_stale("t1").await.unwrap(), 1);
        assert_eq!(store.waiting(10).await.unwrap(), vec!["t1".to_string()]);
    }
}
