//! Worker pool and the per-item import pipeline.
//!
//! Each worker owns whole tasks: it claims a task from the queue, runs
//! every unfinished item through the pipeline in id order, then settles
//! the task. Items are processed one at a time within a task so progress
//! moves in single-item steps. A task-level store error fails the task; a
//! task whose counters do not add up after the run goes back to the queue.
//!
//! # Per-Item Pipeline
//!
//! 1. Mark the item `processing`.
//! 2. Classify the content. A failure fails the item with the classifier's
//!    error text.
//! 3. Drop labels scoring below `label_threshold`.
//! 4. Embed the content.
//! 5. Upsert the vector point (dense + sparse label vector) under the
//!    item's `knowledge_id`.
//! 6. Upsert the knowledge row under the same id.
//! 7. Atomically record the outcome on the item and the task counters.
//! 8. Sleep `item_delay` before the next item.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use knowledge_hub_core::classify::Classifier;
use knowledge_hub_core::dictionary::Dictionary;
use knowledge_hub_core::embedding::Embedder;
use knowledge_hub_core::labels::{build_sparse_vector, filter_labels};
use knowledge_hub_core::models::{
    terminal_status, ImportTaskItem, ItemOutcome, KnowledgeItem, TaskStatus,
};
use knowledge_hub_core::store::{KnowledgeStore, TaskStore};
use knowledge_hub_core::vector::{PointPayload, VectorIndex, VectorPoint};

use crate::queue::TaskQueueService;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub label_threshold: i64,
    pub item_delay: Duration,
}

/// Everything a worker needs to run tasks.
pub struct Pipeline {
    pub tasks: Arc<dyn TaskStore>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub classifier: Arc<dyn Classifier>,
    pub embedder: Arc<dyn Embedder>,
    pub dictionary: Arc<Dictionary>,
    pub settings: PipelineSettings,
}

impl Pipeline {
    /// Run all unfinished items of a claimed task and settle it.
    ///
    /// Returns the status the task ended in. `Processing` means some item
    /// outcomes could not be recorded and the task should be retried. An
    /// `Err` means the task itself could not be processed; it has been
    /// marked `failed` with the error text when possible.
    pub async fn process_task(&self, task_id: &str) -> Result<TaskStatus> {
        match self.run_task(task_id).await {
            Ok(status) => Ok(status),
            Err(e) => {
                self.fail_task(task_id, &format!("{:#}", e)).await;
                Err(e)
            }
        }
    }

    async fn run_task(&self, task_id: &str) -> Result<TaskStatus> {
        self.tasks
            .get_task(task_id)
            .await
            .and_then(|t| t.with_context(|| format!("task not found: {}", task_id)))
            .context("Failed to load task")?;

        self.tasks
            .update_task_status(task_id, TaskStatus::Processing, "Processing items")
            .await
            .context("Failed to mark task processing")?;

        let items = self
            .tasks
            .unfinished_items(task_id)
            .await
            .context("Failed to load task items")?;
        tracing::info!(task_id, items = items.len(), "processing import task");

        for item in items {
            let started = self
                .tasks
                .start_item(item.id)
                .await
                .with_context(|| format!("Failed to start item {}", item.id))?;
            if !started {
                continue;
            }

            let outcome = match self.run_item(&item).await {
                Ok(()) => ItemOutcome::Completed,
                Err(e) => {
                    tracing::warn!(task_id, item_id = item.id, error = %e, "import item failed");
                    ItemOutcome::Failed(format!("{:#}", e))
                }
            };

            match self.tasks.finish_item(task_id, item.id, &outcome).await {
                Ok(task) => tracing::debug!(
                    task_id,
                    item_id = item.id,
                    progress = task.progress,
                    "item finished"
                ),
                Err(e) => {
                    tracing::error!(task_id, item_id = item.id, error = %e, "failed to record item outcome")
                }
            }

            if !self.settings.item_delay.is_zero() {
                tokio::time::sleep(self.settings.item_delay).await;
            }
        }

        self.settle(task_id).await
    }

    async fn run_item(&self, item: &ImportTaskItem) -> Result<()> {
        let payload = &item.payload;

        let classification = self.classifier.classify(&payload.content).await?;
        let labels = filter_labels(classification.labels, self.settings.label_threshold);

        let dense = self.embedder.embed(&payload.content).await?;
        let sparse = build_sparse_vector(&labels, &self.dictionary);

        self.vectors
            .upsert(VectorPoint {
                id: item.knowledge_id.clone(),
                dense,
                sparse,
                payload: PointPayload {
                    repo_name: payload.repo_name.clone(),
                    content: payload.content.clone(),
                    labels: labels.iter().map(|l| l.label.clone()).collect(),
                    summary: classification.summary.clone(),
                },
            })
            .await?;

        let now = chrono::Utc::now().timestamp();
        self.knowledge
            .upsert_knowledge(&KnowledgeItem {
                id: item.knowledge_id.clone(),
                repo_name: payload.repo_name.clone(),
                content: payload.content.clone(),
                labels,
                summary: classification.summary,
                created_at: now,
                updated_at: now,
            })
            .await?;

        Ok(())
    }

    /// Apply the terminal status once every item is accounted for.
    async fn settle(&self, task_id: &str) -> Result<TaskStatus> {
        let task = self
            .tasks
            .get_task(task_id)
            .await
            .and_then(|t| t.with_context(|| format!("task not found: {}", task_id)))
            .context("Failed to settle task")?;

        match terminal_status(task.processed, task.failed, task.total) {
            Some(status) => {
                let message = format!(
                    "Import finished: {} succeeded, {} failed, {} total",
                    task.processed, task.failed, task.total
                );
                self.tasks
                    .update_task_status(task_id, status, &message)
                    .await?;
                tracing::info!(
                    task_id,
                    status = %status,
                    processed = task.processed,
                    failed = task.failed,
                    "import task settled"
                );
                Ok(status)
            }
            None => {
                let message = format!(
                    "Processing incomplete: {} of {} items accounted for",
                    task.processed + task.failed,
                    task.total
                );
                self.tasks.update_task_message(task_id, &message).await?;
                tracing::warn!(task_id, %message, "import task left unsettled");
                Ok(TaskStatus::Processing)
            }
        }
    }

    async fn fail_task(&self, task_id: &str, message: &str) {
        tracing::error!(task_id, %message, "import task failed");
        if let Err(e) = self
            .tasks
            .update_task_status(task_id, TaskStatus::Failed, message)
            .await
        {
            tracing::error!(task_id, error = %e, "could not mark task failed");
        }
    }
}

/// Fixed-size pool of workers draining the queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(size: usize, queue: Arc<TaskQueueService>, pipeline: Arc<Pipeline>) -> Self {
        let handles = (0..size.max(1))
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    tracing::debug!(worker, "worker started");
                    while let Some(task_id) = queue.dequeue().await {
                        let success = match pipeline.process_task(&task_id).await {
                            Ok(status) if status.is_terminal() => status != TaskStatus::Failed,
                            Ok(_) => {
                                // Unsettled: hand the entry back to the poller.
                                match queue.retry(&task_id).await {
                                    Ok(_) => {
                                        tracing::warn!(worker, task_id = %task_id, "task unsettled, re-queued")
                                    }
                                    Err(e) => {
                                        tracing::error!(worker, task_id = %task_id, error = %e, "failed to re-queue task")
                                    }
                                }
                                continue;
                            }
                            Err(e) => {
                                tracing::error!(worker, task_id = %task_id, error = %e, "task processing aborted");
                                false
                            }
                        };
                        if let Err(e) = queue.complete(&task_id, success).await {
                            tracing::error!(worker, task_id = %task_id, error = %e, "failed to complete queue entry");
                        }
                    }
                    tracing::debug!(worker, "worker stopped");
                })
            })
            .collect();
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit (after queue shutdown).
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker panicked");
            }
        }
    }
}
