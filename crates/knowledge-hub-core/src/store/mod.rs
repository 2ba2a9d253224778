//! Storage abstraction for Knowledge Hub.
//!
//! Three traits split the relational store by concern so each consumer
//! depends only on what it touches:
//!
//! | Trait | Used by |
//! |-------|---------|
//! | [`KnowledgeStore`] | pipeline writes, search hydration, keyword search |
//! | [`TaskStore`] | task submission, worker progress, recovery |
//! | [`QueueStore`] | the durable task queue |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! The SQLite backend lives in the app crate; [`memory::InMemoryStore`]
//! implements all three for tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ImportTask, ImportTaskItem, ItemOutcome, KnowledgeItem, NewTaskItem, TaskQueueEntry,
    TaskStatus,
};

/// Knowledge rows.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace a knowledge item by id.
    async fn upsert_knowledge(&self, item: &KnowledgeItem) -> Result<()>;

    async fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeItem>>;

    /// Substring match on content or summary, newest first.
    async fn keyword_search(
        &self,
        query: &str,
        repo_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeItem>>;

    /// Distinct repository names, ascending.
    async fn list_repos(&self) -> Result<Vec<String>>;
}

/// Import tasks and their items.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_task`](TaskStore::create_task) | Task + items in one transaction |
/// | [`unfinished_items`](TaskStore::unfinished_items) | Items a worker still owes |
/// | [`start_item`](TaskStore::start_item) | `pending → processing` |
/// | [`finish_item`](TaskStore::finish_item) | Item status + task counters, atomically |
/// | [`unfinished_tasks`](TaskStore::unfinished_tasks) | Recovery scan |
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task and all its items atomically.
    async fn create_task(&self, task: &ImportTask, items: &[NewTaskItem]) -> Result<()>;

    async fn get_task(&self, id: &str) -> Result<Option<ImportTask>>;

    /// All items of a task, ordered by id.
    async fn list_items(&self, task_id: &str) -> Result<Vec<ImportTaskItem>>;

    /// Items in `pending` or `processing`, ordered by id.
    async fn unfinished_items(&self, task_id: &str) -> Result<Vec<ImportTaskItem>>;

    /// Tasks in `pending` or `processing`, oldest first.
    async fn unfinished_tasks(&self) -> Result<Vec<ImportTask>>;

    /// Set status and message without touching counters.
    async fn update_task_status(&self, id: &str, status: TaskStatus, message: &str) -> Result<()>;

    async fn update_task_message(&self, id: &str, message: &str) -> Result<()>;

    /// Move an item to `processing`. Returns `false` if it is already
    /// terminal.
    async fn start_item(&self, item_id: i64) -> Result<bool>;

    /// In one transaction: move a `processing` item to its terminal status
    /// and bump the matching task counter and progress.
    ///
    /// Returns the task after the update. An item that was not
    /// `processing` is left alone and the counters are not touched.
    async fn finish_item(
        &self,
        task_id: &str,
        item_id: i64,
        outcome: &ItemOutcome,
    ) -> Result<ImportTask>;
}

/// Durable queue rows.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a `waiting` entry unless the task already has an active
    /// (`waiting` or `processing`) one. Returns whether a row was written.
    async fn insert_waiting(&self, task_id: &str, priority: i64) -> Result<bool>;

    /// Atomically move the task's `waiting` entry to `processing`.
    /// Returns `true` only for the caller whose update changed the row.
    async fn claim(&self, task_id: &str) -> Result<bool>;

    /// Move the task's `processing` entry to `completed` or `failed`.
    async fn finish(&self, task_id: &str, success: bool) -> Result<bool>;

    /// Waiting task ids, highest priority first, then oldest first.
    async fn waiting(&self, limit: usize) -> Result<Vec<String>>;

    /// Move a leftover `processing` entry back to `waiting`.
    async fn requeue_processing(&self, task_id: &str) -> Result<u64>;

    async fn entries_for(&self, task_id: &str) -> Result<Vec<TaskQueueEntry>>;
}
