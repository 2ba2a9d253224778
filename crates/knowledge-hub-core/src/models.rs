//! Core data models shared by the import pipeline and the ranking engine.
//!
//! Timestamps are Unix seconds (`i64`), matching the relational schema.
//! Status enums serialize as the lowercase strings stored in the database.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A categorical tag with an integer relevance score from the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: i64,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: i64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// A persisted knowledge entry, produced by a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Server-generated UUID; also the point id in the vector store.
    pub id: String,
    pub repo_name: String,
    pub content: String,
    pub labels: Vec<LabelScore>,
    pub summary: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A ranked search hit.
///
/// `score` scale depends on the mode that produced it: keyword hits are
/// `1.0`, vector hits carry the store-reported similarity, and keyword
/// fallback hits are down-weighted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub repo_name: String,
    pub content: String,
    pub labels: Vec<LabelScore>,
    pub summary: String,
    pub score: f64,
}

impl SearchResult {
    pub fn from_item(item: KnowledgeItem, score: f64) -> Self {
        Self {
            id: item.id,
            repo_name: item.repo_name,
            content: item.content,
            labels: item.labels,
            summary: item.summary,
            score,
        }
    }
}

/// Retrieval strategy for a search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Semantic,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "invalid search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an [`ImportTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    CompletedWithErrors,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::CompletedWithErrors => "completed_with_errors",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::CompletedWithErrors
        )
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "completed_with_errors" => Ok(TaskStatus::CompletedWithErrors),
            other => bail!("unknown task status: {}", other),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single [`ImportTaskItem`]. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "processing" => Ok(ItemStatus::Processing),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            other => bail!("unknown item status: {}", other),
        }
    }
}

/// Status of a durable [`TaskQueueEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(QueueStatus::Waiting),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => bail!("unknown queue status: {}", other),
        }
    }
}

/// A batch import job and its counters.
///
/// `processed + failed <= total` always holds; the status only becomes
/// terminal once the two counters add up to `total`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportTask {
    pub id: String,
    pub status: TaskStatus,
    pub progress: i64,
    pub total: i64,
    pub processed: i64,
    pub failed: i64,
    pub message: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ImportTask {
    /// A fresh `pending` task for `total` items.
    pub fn new_pending(id: impl Into<String>, total: i64, now: i64) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            progress: 0,
            total,
            processed: 0,
            failed: 0,
            message: "Task created, waiting to be processed".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.processed + self.failed == self.total
    }
}

/// The raw input of one item, stored as JSON on the item row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePayload {
    pub repo_name: String,
    pub content: String,
}

/// One unit of work inside an [`ImportTask`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportTaskItem {
    pub id: i64,
    pub task_id: String,
    /// Id the resulting [`KnowledgeItem`] is written under. Assigned when
    /// the task is created so a retried item overwrites its own records.
    pub knowledge_id: String,
    pub status: ItemStatus,
    pub payload: SourcePayload,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Item data supplied at task creation; the store assigns the sequence id.
#[derive(Debug, Clone)]
pub struct NewTaskItem {
    pub knowledge_id: String,
    pub payload: SourcePayload,
}

/// A durable queue row pointing at an [`ImportTask`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskQueueEntry {
    pub id: String,
    pub task_id: String,
    pub priority: i64,
    pub status: QueueStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
}

/// Result of running one item through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Completed,
    Failed(String),
}

/// `round(100 × (processed + failed) / total)`, clamped to `[0, 100]`.
///
/// An empty task counts as fully done.
pub fn progress_percent(processed: i64, failed: i64, total: i64) -> i64 {
    if total <= 0 {
        return 100;
    }
    let done = (processed + failed).clamp(0, total) as f64;
    (100.0 * done / total as f64).round() as i64
}

/// Terminal status for the given counters, or `None` if items remain.
///
/// `completed` when nothing failed, `failed` when nothing succeeded,
/// otherwise `completed_with_errors`.
pub fn terminal_status(processed: i64, failed: i64, total: i64) -> Option<TaskStatus> {
    if processed + failed != total {
        return None;
    }
    if failed == 0 {
        Some(TaskStatus::Completed)
    } else if processed == 0 {
        Some(TaskStatus::Failed)
    } else {
        Some(TaskStatus::CompletedWithErrors)
    }
}
