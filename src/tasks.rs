//! Import task submission, status, and restart recovery.
//!
//! [`ImportService::submit`] validates a batch, persists the task with one
//! item row per input, and enqueues it. Each item gets its knowledge id at
//! creation time so a retried item overwrites its own earlier writes
//! instead of duplicating them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use knowledge_hub_core::models::{ImportTask, ImportTaskItem, NewTaskItem, SourcePayload, TaskStatus};
use knowledge_hub_core::store::TaskStore;

use crate::error::{ServiceError, ServiceResult};
use crate::queue::TaskQueueService;

/// Body of an import request.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    pub repo_name: String,
    pub items: Vec<ImportItem>,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportItem {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub task_id: String,
    pub message: String,
}

/// A task together with its items.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    #[serde(flatten)]
    pub task: ImportTask,
    pub items: Vec<ItemView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    pub id: i64,
    pub knowledge_id: String,
    pub repo_name: String,
    pub content: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<ImportTaskItem> for ItemView {
    fn from(item: ImportTaskItem) -> Self {
        Self {
            id: item.id,
            knowledge_id: item.knowledge_id,
            repo_name: item.payload.repo_name,
            content: item.payload.content,
            status: item.status.as_str().to_string(),
            error_message: item.error_message,
        }
    }
}

pub struct ImportService {
    tasks: Arc<dyn TaskStore>,
    queue: Arc<TaskQueueService>,
}

impl ImportService {
    pub fn new(tasks: Arc<dyn TaskStore>, queue: Arc<TaskQueueService>) -> Self {
        Self { tasks, queue }
    }

    /// Persist and enqueue an import batch.
    ///
    /// Returns as soon as the task is durable; processing happens on the
    /// worker pool.
    pub async fn submit(&self, req: ImportRequest) -> ServiceResult<ImportResponse> {
        let repo_name = req.repo_name.trim();
        if repo_name.is_empty() {
            return Err(ServiceError::Validation("repo_name must not be empty".into()));
        }
        if req.items.is_empty() {
            return Err(ServiceError::Validation("items must not be empty".into()));
        }
        if let Some(pos) = req.items.iter().position(|i| i.content.trim().is_empty()) {
            return Err(ServiceError::Validation(format!(
                "items[{}].content must not be empty",
                pos
            )));
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let items: Vec<NewTaskItem> = req
            .items
            .into_iter()
            .map(|item| NewTaskItem {
                knowledge_id: uuid::Uuid::new_v4().to_string(),
                payload: SourcePayload {
                    repo_name: repo_name.to_string(),
                    content: item.content,
                },
            })
            .collect();

        let task = ImportTask::new_pending(task_id.clone(), items.len() as i64, now);
        self.tasks.create_task(&task, &items).await?;

        if let Err(e) = self.queue.enqueue(&task_id, req.priority).await {
            let message = format!("Failed to enqueue task: {:#}", e);
            if let Err(e2) = self
                .tasks
                .update_task_status(&task_id, TaskStatus::Failed, &message)
                .await
            {
                tracing::error!(task_id = %task_id, error = %e2, "could not mark task failed");
            }
            return Err(ServiceError::Internal(e.context("failed to enqueue import task")));
        }

        tracing::info!(task_id = %task_id, repo = repo_name, items = task.total, "import task accepted");
        Ok(ImportResponse {
            task_id,
            message: format!("Import task created with {} items", task.total),
        })
    }

    pub async fn task_status(&self, task_id: &str) -> ServiceResult<TaskStatusView> {
        let task = self
            .tasks
            .get_task(task_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("task not found: {}", task_id)))?;
        let items = self.tasks.list_items(task_id).await?;
        Ok(TaskStatusView {
            task,
            items: items.into_iter().map(ItemView::from).collect(),
        })
    }

    /// Put every unfinished task back on the queue.
    ///
    /// Must run before workers start: a leftover `processing` queue entry
    /// is assumed to belong to a worker that died with the last process.
    /// Running it twice leaves one active entry per task. A task whose
    /// queue entry cannot be written is marked `failed` and the scan moves
    /// on. Returns how many tasks were re-queued.
    pub async fn recover(&self) -> anyhow::Result<usize> {
        let unfinished = self.tasks.unfinished_tasks().await?;
        let mut recovered = 0;
        for task in &unfinished {
            if let Err(e) = self.requeue(&task.id).await {
                let message = format!("Failed to re-queue task: {:#}", e);
                tracing::error!(task_id = %task.id, error = %message, "recovery failed for task");
                if let Err(e2) = self
                    .tasks
                    .update_task_status(&task.id, TaskStatus::Failed, &message)
                    .await
                {
                    tracing::error!(task_id = %task.id, error = %e2, "could not mark task failed");
                }
                continue;
            }
            tracing::info!(task_id = %task.id, status = %task.status, "recovered unfinished task");
            recovered += 1;
        }
        if !unfinished.is_empty() {
            tracing::info!(
                recovered,
                failed = unfinished.len() - recovered,
                "recovery finished"
            );
        }
        Ok(recovered)
    }

    async fn requeue(&self, task_id: &str) -> anyhow::Result<()> {
        self.queue.requeue_stale(task_id).await?;
        if let Err(e) = self
            .tasks
            .update_task_message(task_id, "Task re-queued after restart")
            .await
        {
            tracing::warn!(task_id, error = %e, "could not update task message");
        }
        self.queue.enqueue(task_id, 0).await?;
        Ok(())
    }
}
