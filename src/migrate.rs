use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create knowledge table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge (
            id TEXT PRIMARY KEY,
            repo_name TEXT NOT NULL,
            content TEXT NOT NULL,
            labels_json TEXT NOT NULL DEFAULT '[]',
            summary TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_knowledge_repo ON knowledge(repo_name)")
        .execute(pool)
        .await?;

    // Create import task table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_task (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (processed + failed <= total)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create import task item table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_task_item (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            knowledge_id TEXT NOT NULL,
            status TEXT NOT NULL,
            source_json TEXT NOT NULL,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (task_id) REFERENCES import_task(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_import_task_item_task ON import_task_item(task_id, status)",
    )
    .execute(pool)
    .await?;

    // Create task queue table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_queue (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            started_at INTEGER,
            ended_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active entry per task
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_task_queue_active
        ON task_queue(task_id) WHERE status IN ('waiting', 'processing')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_task_queue_poll ON task_queue(status, priority, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
