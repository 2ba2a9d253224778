//! SQLite-backed storage.
//!
//! [`SqliteStore`] implements all three storage traits over one pool.
//! Multi-row updates that must stay consistent (task creation, item
//! completion) run inside a transaction; the queue claim is a single
//! conditional `UPDATE` whose `rows_affected` decides ownership.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use knowledge_hub_core::models::{
    ImportTask, ImportTaskItem, ItemOutcome, KnowledgeItem, LabelScore, NewTaskItem,
    SourcePayload, TaskQueueEntry, TaskStatus,
};
use knowledge_hub_core::store::{KnowledgeStore, QueueStore, TaskStore};

/// SQLite implementation of the storage traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn row_to_knowledge(row: &SqliteRow) -> Result<KnowledgeItem> {
    let labels_json: String = row.get("labels_json");
    let labels: Vec<LabelScore> = serde_json::from_str(&labels_json).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unreadable labels_json, treating as empty");
        Vec::new()
    });
    Ok(KnowledgeItem {
        id: row.get("id"),
        repo_name: row.get("repo_name"),
        content: row.get("content"),
        labels,
        summary: row.get("summary"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_task(row: &SqliteRow) -> Result<ImportTask> {
    let status: String = row.get("status");
    Ok(ImportTask {
        id: row.get("id"),
        status: status.parse()?,
        progress: row.get("progress"),
        total: row.get("total"),
        processed: row.get("processed"),
        failed: row.get("failed"),
        message: row.get("message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_item(row: &SqliteRow) -> Result<ImportTaskItem> {
    let status: String = row.get("status");
    let source_json: String = row.get("source_json");
    let payload: SourcePayload =
        serde_json::from_str(&source_json).context("corrupt import item source_json")?;
    Ok(ImportTaskItem {
        id: row.get("id"),
        task_id: row.get("task_id"),
        knowledge_id: row.get("knowledge_id"),
        status: status.parse()?,
        payload,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<TaskQueueEntry> {
    let status: String = row.get("status");
    Ok(TaskQueueEntry {
        id: row.get("id"),
        task_id: row.get("task_id"),
        priority: row.get("priority"),
        status: status.parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
    })
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn upsert_knowledge(&self, item: &KnowledgeItem) -> Result<()> {
        let labels_json = serde_json::to_string(&item.labels)?;
        sqlx::query(
            r#"
            INSERT INTO knowledge (id, repo_name, content, labels_json, summary, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                repo_name = excluded.repo_name,
                content = excluded.content,
                labels_json = excluded.labels_json,
                summary = excluded.summary,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.repo_name)
        .bind(&item.content)
        .bind(&labels_json)
        .bind(&item.summary)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let row = sqlx::query(
            "SELECT id, repo_name, content, labels_json, summary, created_at, updated_at FROM knowledge WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_knowledge).transpose()
    }

    async fn keyword_search(
        &self,
        query: &str,
        repo_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeItem>> {
        let pattern = like_pattern(query);
        let rows = sqlx::query(
            r#"
            SELECT id, repo_name, content, labels_json, summary, created_at, updated_at
            FROM knowledge
            WHERE (content LIKE ?1 ESCAPE '\' OR summary LIKE ?1 ESCAPE '\')
              AND (?2 IS NULL OR repo_name = ?2)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3
            "#,
        )
        .bind(&pattern)
        .bind(repo_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_knowledge).collect()
    }

    async fn list_repos(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT repo_name FROM knowledge ORDER BY repo_name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("repo_name")).collect())
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: &ImportTask, items: &[NewTaskItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO import_task (id, status, progress, total, processed, failed, message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(task.status.as_str())
        .bind(task.progress)
        .bind(task.total)
        .bind(task.processed)
        .bind(task.failed)
        .bind(&task.message)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in items {
            let source_json = serde_json::to_string(&item.payload)?;
            sqlx::query(
                r#"
                INSERT INTO import_task_item (task_id, knowledge_id, status, source_json, created_at, updated_at)
                VALUES (?, ?, 'pending', ?, ?, ?)
                "#,
            )
            .bind(&task.id)
            .bind(&item.knowledge_id)
            .bind(&source_json)
            .bind(task.created_at)
            .bind(task.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<ImportTask>> {
        let row = sqlx::query("SELECT * FROM import_task WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn list_items(&self, task_id: &str) -> Result<Vec<ImportTaskItem>> {
        let rows = sqlx::query("SELECT * FROM import_task_item WHERE task_id = ? ORDER BY id ASC")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn unfinished_items(&self, task_id: &str) -> Result<Vec<ImportTaskItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM import_task_item
            WHERE task_id = ? AND status IN ('pending', 'processing')
            ORDER BY id ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn unfinished_tasks(&self) -> Result<Vec<ImportTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM import_task
            WHERE status IN ('pending', 'processing')
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus, message: &str) -> Result<()> {
        sqlx::query("UPDATE import_task SET status = ?, message = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(message)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_task_message(&self, id: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE import_task SET message = ?, updated_at = ? WHERE id = ?")
            .bind(message)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn start_item(&self, item_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_task_item SET status = 'processing', updated_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(now())
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_item(
        &self,
        task_id: &str,
        item_id: i64,
        outcome: &ItemOutcome,
    ) -> Result<ImportTask> {
        let (status, error, processed_inc, failed_inc) = match outcome {
            ItemOutcome::Completed => ("completed", None, 1i64, 0i64),
            ItemOutcome::Failed(msg) => ("failed", Some(msg.as_str()), 0, 1),
        };
        let ts = now();

        let mut tx = self.pool.begin().await?;

        let changed = sqlx::query(
            r#"
            UPDATE import_task_item SET status = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND task_id = ? AND status = 'processing'
            "#,
        )
        .bind(status)
        .bind(error)
        .bind(ts)
        .bind(item_id)
        .bind(task_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if changed == 1 {
            // SET expressions see the pre-update row, so add the increments
            // explicitly when recomputing progress.
            sqlx::query(
                r#"
                UPDATE import_task SET
                    processed = processed + ?1,
                    failed = failed + ?2,
                    progress = CASE WHEN total > 0
                        THEN CAST(ROUND(100.0 * (processed + failed + ?1 + ?2) / total) AS INTEGER)
                        ELSE 100 END,
                    updated_at = ?3
                WHERE id = ?4
                "#,
            )
            .bind(processed_inc)
            .bind(failed_inc)
            .bind(ts)
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query("SELECT * FROM import_task WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?
            .with_context(|| format!("task not found: {}", task_id))?;
        let task = row_to_task(&row)?;

        tx.commit().await?;
        Ok(task)
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn insert_waiting(&self, task_id: &str, priority: i64) -> Result<bool> {
        let ts = now();
        // The partial unique index turns a second active entry into a no-op.
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO task_queue (id, task_id, priority, status, created_at, updated_at)
            VALUES (?, ?, ?, 'waiting', ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(task_id)
        .bind(priority)
        .bind(ts)
        .bind(ts)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim(&self, task_id: &str) -> Result<bool> {
        let ts = now();
        let result = sqlx::query(
            r#"
            UPDATE task_queue SET status = 'processing', started_at = ?, updated_at = ?
            WHERE task_id = ? AND status = 'waiting'
            "#,
        )
        .bind(ts)
        .bind(ts)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish(&self, task_id: &str, success: bool) -> Result<bool> {
        let ts = now();
        let status = if success { "completed" } else { "failed" };
        let result = sqlx::query(
            r#"
            UPDATE task_queue SET status = ?, ended_at = ?, updated_at = ?
            WHERE task_id = ? AND status = 'processing'
            "#,
        )
        .bind(status)
        .bind(ts)
        .bind(ts)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn waiting(&self, limit: usize) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id FROM task_queue
            WHERE status = 'waiting'
            ORDER BY priority DESC, created_at ASC, rowid ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("task_id")).collect())
    }

    async fn requeue_processing(&self, task_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE task_queue SET status = 'waiting', started_at = NULL, updated_at = ?
            WHERE task_id = ? AND status = 'processing'
            "#,
        )
        .bind(now())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn entries_for(&self, task_id: &str) -> Result<Vec<TaskQueueEntry>> {
        let rows =
            sqlx::query("SELECT * FROM task_queue WHERE task_id = ? ORDER BY created_at, rowid")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_entry).collect()
    }
}
