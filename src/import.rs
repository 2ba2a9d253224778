//! `khub import`, `khub status`, and `khub classify`.
//!
//! `import` only persists and enqueues the task; a running `khub serve`
//! picks it up from the durable queue on its next poll.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::app::App;
use crate::config::Config;
use crate::tasks::{ImportItem, ImportRequest};

/// One entry of an import file: either a bare string or `{"content": ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum FileItem {
    Text(String),
    Object { content: String },
}

fn read_items(path: &Path) -> Result<Vec<ImportItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let items: Vec<FileItem> = serde_json::from_str(&raw)
        .with_context(|| format!("Import file must be a JSON array: {}", path.display()))?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            FileItem::Text(content) | FileItem::Object { content } => ImportItem { content },
        })
        .collect())
}

pub async fn run_import(config: &Config, file: &Path, repo: &str, priority: i64) -> Result<()> {
    let items = read_items(file)?;
    let app = App::open(config).await?;
    let resp = app
        .imports
        .submit(ImportRequest {
            repo_name: repo.to_string(),
            items,
            priority,
        })
        .await?;
    println!("{}", resp.message);
    println!("task: {}", resp.task_id);
    Ok(())
}

pub async fn run_status(config: &Config, task_id: &str) -> Result<()> {
    let app = App::open(config).await?;
    let view = app.imports.task_status(task_id).await?;
    let task = &view.task;

    println!("task: {}", task.id);
    println!("status: {}", task.status);
    println!(
        "progress: {}% ({} succeeded, {} failed, {} total)",
        task.progress, task.processed, task.failed, task.total
    );
    println!("message: {}", task.message);
    for item in &view.items {
        match &item.error_message {
            Some(err) => println!("  #{} {} ({})", item.id, item.status, err),
            None => println!("  #{} {}", item.id, item.status),
        }
    }
    Ok(())
}

pub async fn run_classify(config: &Config, text: &str) -> Result<()> {
    let app = App::open(config).await?;
    let classification = app.classify(text).await?;
    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_items_accepts_strings_and_objects() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["first", {{"content": "second"}}]"#).unwrap();
        let items = read_items(file.path()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "first");
        assert_eq!(items[1].content, "second");
    }

    #[test]
    fn test_read_items_rejects_non_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"content": "x"}}"#).unwrap();
        assert!(read_items(file.path()).is_err());
    }
}
