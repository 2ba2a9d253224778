//! In-memory store and vector index for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! [`InMemoryStore`] implements every storage trait; keyword search is a
//! substring scan that ignores ASCII case, like SQLite `LIKE`. [`InMemoryVectorIndex`] runs the sparse
//! prefetch as a dot product and the dense stage as brute-force cosine.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{
    progress_percent, ImportTask, ImportTaskItem, ItemOutcome, ItemStatus, KnowledgeItem,
    NewTaskItem, QueueStatus, TaskQueueEntry, TaskStatus,
};
use crate::vector::{cosine_similarity, ScoredPoint, VectorIndex, VectorPoint, VectorQuery};

use super::{KnowledgeStore, QueueStore, TaskStore};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// In-memory store for tests.
pub struct InMemoryStore {
    knowledge: RwLock<HashMap<String, (u64, KnowledgeItem)>>,
    tasks: RwLock<HashMap<String, ImportTask>>,
    items: RwLock<Vec<ImportTaskItem>>,
    queue: RwLock<Vec<TaskQueueEntry>>,
    seq: RwLock<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            knowledge: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            items: RwLock::new(Vec::new()),
            queue: RwLock::new(Vec::new()),
            seq: RwLock::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        let mut seq = self.seq.write().unwrap();
        *seq += 1;
        *seq
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn upsert_knowledge(&self, item: &KnowledgeItem) -> Result<()> {
        let seq = self.next_seq();
        let mut knowledge = self.knowledge.write().unwrap();
        let seq = knowledge.get(&item.id).map(|(s, _)| *s).unwrap_or(seq);
        knowledge.insert(item.id.clone(), (seq, item.clone()));
        Ok(())
    }

    async fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let knowledge = self.knowledge.read().unwrap();
        Ok(knowledge.get(id).map(|(_, item)| item.clone()))
    }

    async fn keyword_search(
        &self,
        query: &str,
        repo_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeItem>> {
        let query = query.to_ascii_lowercase();
        let knowledge = self.knowledge.read().unwrap();
        let mut hits: Vec<&(u64, KnowledgeItem)> = knowledge
            .values()
            .filter(|(_, item)| {
                item.content.to_ascii_lowercase().contains(&query)
                    || item.summary.to_ascii_lowercase().contains(&query)
            })
            .filter(|(_, item)| repo_name.map_or(true, |r| item.repo_name == r))
            .collect();
        hits.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn list_repos(&self) -> Result<Vec<String>> {
        let knowledge = self.knowledge.read().unwrap();
        let mut repos: Vec<String> = knowledge
            .values()
            .map(|(_, item)| item.repo_name.clone())
            .collect();
        repos.sort();
        repos.dedup();
        Ok(repos)
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: &ImportTask, new_items: &[NewTaskItem]) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&task.id) {
            bail!("task already exists: {}", task.id);
        }
        let mut items = self.items.write().unwrap();
        let mut next_id = items.len() as i64 + 1;
        for item in new_items {
            items.push(ImportTaskItem {
                id: next_id,
                task_id: task.id.clone(),
                knowledge_id: item.knowledge_id.clone(),
                status: ItemStatus::Pending,
                payload: item.payload.clone(),
                error_message: None,
                created_at: task.created_at,
                updated_at: task.created_at,
            });
            next_id += 1;
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<ImportTask>> {
        Ok(self.tasks.read().unwrap().get(id).cloned())
    }

    async fn list_items(&self, task_id: &str) -> Result<Vec<ImportTaskItem>> {
        let items = self.items.read().unwrap();
        Ok(items
            .iter()
            .filter(|i| i.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn unfinished_items(&self, task_id: &str) -> Result<Vec<ImportTaskItem>> {
        let items = self.items.read().unwrap();
        Ok(items
            .iter()
            .filter(|i| i.task_id == task_id)
            .filter(|i| matches!(i.status, ItemStatus::Pending | ItemStatus::Processing))
            .cloned()
            .collect())
    }

    async fn unfinished_tasks(&self) -> Result<Vec<ImportTask>> {
        let tasks = self.tasks.read().unwrap();
        let mut out: Vec<ImportTask> = tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Processing))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus, message: &str) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.status = status;
            task.message = message.to_string();
            task.updated_at = now();
        }
        Ok(())
    }

    async fn update_task_message(&self, id: &str, message: &str) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.message = message.to_string();
            task.updated_at = now();
        }
        Ok(())
    }

    async fn start_item(&self, item_id: i64) -> Result<bool> {
        let mut items = self.items.write().unwrap();
        let Some(item) = items.iter_mut().find(|i| i.id == item_id) else {
            return Ok(false);
        };
        match item.status {
            ItemStatus::Pending | ItemStatus::Processing => {
                item.status = ItemStatus::Processing;
                item.updated_at = now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_item(
        &self,
        task_id: &str,
        item_id: i64,
        outcome: &ItemOutcome,
    ) -> Result<ImportTask> {
        // Hold both locks so item and counters change together.
        let mut tasks = self.tasks.write().unwrap();
        let mut items = self.items.write().unwrap();

        let Some(task) = tasks.get_mut(task_id) else {
            bail!("task not found: {}", task_id);
        };

        if let Some(item) = items
            .iter_mut()
            .find(|i| i.id == item_id && i.status == ItemStatus::Processing)
        {
            match outcome {
                ItemOutcome::Completed => {
                    item.status = ItemStatus::Completed;
                    task.processed += 1;
                }
                ItemOutcome::Failed(msg) => {
                    item.status = ItemStatus::Failed;
                    item.error_message = Some(msg.clone());
                    task.failed += 1;
                }
            }
            item.updated_at = now();
            task.progress = progress_percent(task.processed, task.failed, task.total);
            task.updated_at = now();
        }

        Ok(task.clone())
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn insert_waiting(&self, task_id: &str, priority: i64) -> Result<bool> {
        let mut queue = self.queue.write().unwrap();
        let active = queue.iter().any(|e| {
            e.task_id == task_id
                && matches!(e.status, QueueStatus::Waiting | QueueStatus::Processing)
        });
        if active {
            return Ok(false);
        }
        let ts = now();
        queue.push(TaskQueueEntry {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            priority,
            status: QueueStatus::Waiting,
            created_at: ts,
            updated_at: ts,
            started_at: None,
            ended_at: None,
        });
        Ok(true)
    }

    async fn claim(&self, task_id: &str) -> Result<bool> {
        let mut queue = self.queue.write().unwrap();
        match queue
            .iter_mut()
            .find(|e| e.task_id == task_id && e.status == QueueStatus::Waiting)
        {
            Some(entry) => {
                let ts = now();
                entry.status = QueueStatus::Processing;
                entry.started_at = Some(ts);
                entry.updated_at = ts;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finish(&self, task_id: &str, success: bool) -> Result<bool> {
        let mut queue = self.queue.write().unwrap();
        match queue
            .iter_mut()
            .find(|e| e.task_id == task_id && e.status == QueueStatus::Processing)
        {
            Some(entry) => {
                let ts = now();
                entry.status = if success {
                    QueueStatus::Completed
                } else {
                    QueueStatus::Failed
                };
                entry.ended_at = Some(ts);
                entry.updated_at = ts;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn waiting(&self, limit: usize) -> Result<Vec<String>> {
        let queue = self.queue.read().unwrap();
        // Vec order is insertion order, so a stable sort keeps FIFO ties.
        let mut waiting: Vec<&TaskQueueEntry> = queue
            .iter()
            .filter(|e| e.status == QueueStatus::Waiting)
            .collect();
        waiting.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(waiting
            .into_iter()
            .take(limit)
            .map(|e| e.task_id.clone())
            .collect())
    }

    async fn requeue_processing(&self, task_id: &str) -> Result<u64> {
        let mut queue = self.queue.write().unwrap();
        let mut changed = 0;
        for entry in queue
            .iter_mut()
            .filter(|e| e.task_id == task_id && e.status == QueueStatus::Processing)
        {
            entry.status = QueueStatus::Waiting;
            entry.started_at = None;
            entry.updated_at = now();
            changed += 1;
        }
        Ok(changed)
    }

    async fn entries_for(&self, task_id: &str) -> Result<Vec<TaskQueueEntry>> {
        let queue = self.queue.read().unwrap();
        Ok(queue
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }
}

/// In-memory [`VectorIndex`].
pub struct InMemoryVectorIndex {
    points: RwLock<HashMap<String, VectorPoint>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<VectorPoint> {
        self.points.read().unwrap().get(id).cloned()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, point: VectorPoint) -> Result<()> {
        self.points.write().unwrap().insert(point.id.clone(), point);
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<ScoredPoint>> {
        let points = self.points.read().unwrap();
        let mut candidates: Vec<&VectorPoint> = points
            .values()
            .filter(|p| {
                query
                    .repo_name
                    .as_deref()
                    .map_or(true, |r| p.payload.repo_name == r)
            })
            .collect();

        if let Some(sparse) = query.sparse.as_ref().filter(|s| !s.is_empty()) {
            let mut scored: Vec<(f32, &VectorPoint)> = candidates
                .into_iter()
                .map(|p| (p.sparse.dot(sparse), p))
                .filter(|(s, _)| *s > 0.0)
                .collect();
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.id.cmp(&b.1.id))
            });
            candidates = scored
                .into_iter()
                .take(query.prefetch_limit)
                .map(|(_, p)| p)
                .collect();
        }

        let mut hits: Vec<ScoredPoint> = candidates
            .into_iter()
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(&query.dense, &p.dense) as f64,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }
}
