//! End-to-end tests over SQLite with scripted collaborators.
//!
//! The classifier and embedder are deterministic doubles and the vector
//! index is the in-memory one from the core crate, so these tests exercise
//! the real queue, worker pool, SQLite store, search wiring, and HTTP API
//! without any network services.

use anyhow::{bail, Result};
use async_trait::async_trait;
use knowledge_hub::app::{App, Backends};
use knowledge_hub::config::{load_config, Config};
use knowledge_hub::migrate;
use knowledge_hub::server;
use knowledge_hub::sqlite_store::SqliteStore;
use knowledge_hub::tasks::{ImportItem, ImportRequest};
use knowledge_hub_core::classify::{Classification, Classifier};
use knowledge_hub_core::dictionary::Dictionary;
use knowledge_hub_core::embedding::Embedder;
use knowledge_hub_core::models::{
    ImportTask, ItemOutcome, LabelScore, NewTaskItem, SourcePayload, TaskStatus,
};
use knowledge_hub_core::store::memory::InMemoryVectorIndex;
use knowledge_hub_core::store::{KnowledgeStore, QueueStore, TaskStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ─── Test Collaborators ─────────────────────────────────────────────

/// Labels text by keyword; fails on anything mentioning "corrupt".
struct ScriptedClassifier;

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, text: &str) -> Result<Classification> {
        let lower = text.to_lowercase();
        if lower.contains("corrupt") {
            bail!("classifier returned unparseable output");
        }
        let mut labels = Vec::new();
        if lower.contains("vault") || lower.contains("credential") {
            labels.push(LabelScore::new("security", 5));
        }
        if lower.contains("kubernetes") || lower.contains("deploy") {
            labels.push(LabelScore::new("deployment", 4));
        }
        labels.push(LabelScore::new("howto", 1));
        Ok(Classification {
            labels,
            summary: format!("Notes: {}", text.chars().take(24).collect::<String>()),
        })
    }
}

/// Three-dimensional bag-of-topics embedding.
struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let hit = |words: &[&str]| {
            if words.iter().any(|w| lower.contains(w)) {
                1.0
            } else {
                0.0
            }
        };
        Ok(vec![
            hit(&["vault", "credential", "secret"]),
            hit(&["kubernetes", "deploy", "helm"]),
            0.1,
        ])
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path();
    std::fs::write(
        root.join("labels.json"),
        r#"{"C1_Topic": {"security": 1, "deployment": 2}, "C2_Type": {"howto": 101}}"#,
    )
    .unwrap();
    let path = root.join("khub.toml");
    std::fs::write(
        &path,
        format!(
            r#"[db]
path = "{root}/data/khub.sqlite"

[server]
bind = "127.0.0.1:0"

[queue]
workers = 2
poll_interval_secs = 1
item_delay_ms = 0

[dictionary]
path = "{root}/labels.json"

[classifier]
label_threshold = 3
"#,
            root = root.display()
        ),
    )
    .unwrap();
    load_config(&path).unwrap()
}

async fn sqlite_store(cfg: &Config) -> Arc<SqliteStore> {
    let pool = knowledge_hub::db::connect(cfg).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

fn build_app(cfg: &Config, store: Arc<SqliteStore>, vectors: Arc<InMemoryVectorIndex>) -> App {
    let dictionary = Dictionary::from_json_str(
        &std::fs::read_to_string(&cfg.dictionary.path).unwrap(),
    )
    .unwrap();
    App::new(
        cfg,
        Backends::with_store(
            store,
            vectors,
            Arc::new(ScriptedClassifier),
            Arc::new(TopicEmbedder),
            Arc::new(dictionary),
        ),
    )
}

fn request(repo: &str, contents: &[&str]) -> ImportRequest {
    ImportRequest {
        repo_name: repo.to_string(),
        items: contents
            .iter()
            .map(|c| ImportItem {
                content: c.to_string(),
            })
            .collect(),
        priority: 0,
    }
}

async fn wait_for_terminal(app: &App, task_id: &str) -> TaskStatus {
    for _ in 0..100 {
        let view = app.imports.task_status(task_id).await.unwrap();
        if view.task.status.is_terminal() {
            return view.task.status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {} did not finish within 5 seconds", task_id);
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_import_with_one_failing_item() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let store = sqlite_store(&cfg).await;
    let vectors = Arc::new(InMemoryVectorIndex::new());
    let app = build_app(&cfg, store.clone(), vectors.clone());
    let workers = app.start_workers().await.unwrap();

    let resp = app
        .imports
        .submit(request(
            "ops",
            &[
                "Rotating database credentials with Vault",
                "corrupt blob",
                "Deploying to Kubernetes with Helm",
            ],
        ))
        .await
        .unwrap();

    assert_eq!(
        wait_for_terminal(&app, &resp.task_id).await,
        TaskStatus::CompletedWithErrors
    );

    let view = app.imports.task_status(&resp.task_id).await.unwrap();
    assert_eq!(view.task.processed, 2);
    assert_eq!(view.task.failed, 1);
    assert_eq!(view.task.progress, 100);
    assert_eq!(view.items[1].status, "failed");
    assert!(view.items[1]
        .error_message
        .as_deref()
        .unwrap()
        .contains("unparseable"));

    // Stored under the item's pre-assigned id, with sub-threshold labels dropped.
    let stored = store
        .get_knowledge(&view.items[0].knowledge_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.labels, vec![LabelScore::new("security", 5)]);
    assert_eq!(stored.content, "Rotating database credentials with Vault");
    assert_eq!(stored.summary, "Notes: Rotating database creden");
    assert_eq!(stored.repo_name, "ops");
    assert!(vectors.get(&view.items[0].knowledge_id).is_some());
    assert_eq!(vectors.len(), 2);

    let entries = store.entries_for(&resp.task_id).await.unwrap();
    assert_eq!(entries.len(), 1);

    app.shutdown();
    workers.join().await;
}

#[tokio::test]
async fn test_sqlite_progress_advances_per_item() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let store = sqlite_store(&cfg).await;

    let items: Vec<NewTaskItem> = ["one", "two", "three"]
        .iter()
        .enumerate()
        .map(|(i, c)| NewTaskItem {
            knowledge_id: format!("k{}", i),
            payload: SourcePayload {
                repo_name: "ops".into(),
                content: c.to_string(),
            },
        })
        .collect();
    store
        .create_task(&ImportTask::new_pending("t1", 3, 0), &items)
        .await
        .unwrap();
    let ids: Vec<i64> = store
        .list_items("t1")
        .await
        .unwrap()
        .iter()
        .map(|i| i.id)
        .collect();

    let outcomes = [
        ItemOutcome::Completed,
        ItemOutcome::Failed("boom".into()),
        ItemOutcome::Completed,
    ];
    let mut last_progress = 0;
    for ((id, outcome), expected) in ids.iter().zip(&outcomes).zip([33, 67, 100]) {
        assert!(store.start_item(*id).await.unwrap());
        let task = store.finish_item("t1", *id, outcome).await.unwrap();
        assert_eq!(task.progress, expected);
        assert!(task.progress >= last_progress);
        assert!(task.processed + task.failed <= task.total);
        last_progress = task.progress;
    }

    // Recording an outcome twice changes nothing.
    let task = store
        .finish_item("t1", ids[2], &ItemOutcome::Completed)
        .await
        .unwrap();
    assert_eq!((task.processed, task.failed, task.progress), (2, 1, 100));
}

#[tokio::test]
async fn test_search_modes_after_import() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let store = sqlite_store(&cfg).await;
    let app = build_app(&cfg, store, Arc::new(InMemoryVectorIndex::new()));
    let workers = app.start_workers().await.unwrap();

    let ops = app
        .imports
        .submit(request(
            "ops",
            &[
                "Rotating database credentials with Vault",
                "Deploying to Kubernetes with Helm",
            ],
        ))
        .await
        .unwrap();
    let docs = app
        .imports
        .submit(request("docs", &["Vault secret engines overview"]))
        .await
        .unwrap();
    wait_for_terminal(&app, &ops.task_id).await;
    wait_for_terminal(&app, &docs.task_id).await;

    assert_eq!(app.list_repos().await.unwrap(), vec!["docs", "ops"]);

    let keyword = app
        .search("Helm", None, Some("keyword"), None)
        .await
        .unwrap();
    assert_eq!(keyword.len(), 1);
    assert_eq!(keyword[0].score, 1.0);

    let hybrid = app
        .search("vault credential rotation", Some("ops"), None, Some(5))
        .await
        .unwrap();
    assert!(!hybrid.is_empty());
    assert!(hybrid.iter().all(|r| r.repo_name == "ops"));
    assert!(hybrid[0].content.contains("Vault"));
    assert!(hybrid.windows(2).all(|w| w[0].score >= w[1].score));

    let semantic = app
        .search("kubernetes deploy", None, Some("semantic"), Some(1))
        .await
        .unwrap();
    assert_eq!(semantic.len(), 1);
    assert!(semantic[0].content.contains("Kubernetes"));

    app.shutdown();
    workers.join().await;
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let store = sqlite_store(&cfg).await;

    assert!(store.insert_waiting("t1", 0).await.unwrap());
    assert!(!store.insert_waiting("t1", 5).await.unwrap());

    let claims: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim("t1").await.unwrap() })
        })
        .collect();
    let mut winners = 0;
    for c in claims {
        if c.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    // Still active while processing; a new entry is allowed once it finishes.
    assert!(!store.insert_waiting("t1", 0).await.unwrap());
    assert!(store.finish("t1", true).await.unwrap());
    assert!(store.insert_waiting("t1", 0).await.unwrap());
}

#[tokio::test]
async fn test_queue_orders_by_priority_then_age() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let store = sqlite_store(&cfg).await;

    store.insert_waiting("low", 0).await.unwrap();
    store.insert_waiting("high", 10).await.unwrap();
    store.insert_waiting("low2", 0).await.unwrap();

    assert_eq!(
        store.waiting(10).await.unwrap(),
        vec!["high".to_string(), "low".to_string(), "low2".to_string()]
    );
    assert_eq!(store.waiting(1).await.unwrap(), vec!["high".to_string()]);
}

#[tokio::test]
async fn test_recovery_resumes_interrupted_task() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let store = sqlite_store(&cfg).await;
    let vectors = Arc::new(InMemoryVectorIndex::new());

    // First process: the task is claimed, then the process dies.
    let task_id = {
        let app = build_app(&cfg, store.clone(), vectors.clone());
        let resp = app
            .imports
            .submit(request("ops", &["Vault notes", "Helm notes"]))
            .await
            .unwrap();
        assert_eq!(app.queue.dequeue().await.as_deref(), Some(resp.task_id.as_str()));
        resp.task_id
    };

    // Second process over the same database.
    let app = build_app(&cfg, store.clone(), vectors);
    let workers = app.start_workers().await.unwrap();
    assert_eq!(wait_for_terminal(&app, &task_id).await, TaskStatus::Completed);

    let entries = store.entries_for(&task_id).await.unwrap();
    assert_eq!(entries.len(), 1, "recovery reuses the stale entry");

    app.shutdown();
    workers.join().await;
}

// ─── HTTP ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_api() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let store = sqlite_store(&cfg).await;
    let app = Arc::new(build_app(&cfg, store, Arc::new(InMemoryVectorIndex::new())));
    let workers = app.start_workers().await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(app.clone(), listener, async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let resp = client
        .post(format!("{}/api/v1/knowledge/import", base))
        .json(&json!({"repo_name": "ops", "items": [{"content": "Rotating credentials in Vault"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let task_id = body["task_id"].as_str().unwrap().to_string();

    assert_eq!(wait_for_terminal(&app, &task_id).await, TaskStatus::Completed);

    let task: Value = client
        .get(format!("{}/api/v1/knowledge/tasks/{}", base, task_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(task["status"], "completed");
    assert_eq!(task["progress"], 100);
    assert_eq!(task["items"][0]["status"], "completed");

    let search: Value = client
        .post(format!("{}/api/v1/knowledge/search", base))
        .json(&json!({"query": "vault credentials", "repo_name": "ops"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(search["results"].as_array().unwrap().len(), 1);

    let repos: Value = client
        .get(format!("{}/api/v1/knowledge/repos", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(repos["repos"], json!(["ops"]));

    let classified: Value = client
        .post(format!("{}/api/v1/knowledge/classify", base))
        .json(&json!({"text": "deploy with kubernetes"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(classified["labels"][0]["label"], "deployment");

    // Errors
    let resp = client
        .post(format!("{}/api/v1/knowledge/import", base))
        .json(&json!({"repo_name": "ops", "items": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .get(format!("{}/api/v1/knowledge/tasks/missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .post(format!("{}/api/v1/knowledge/search", base))
        .json(&json!({"query": "x", "mode": "fuzzy"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let _ = stop_tx.send(());
    server.await.unwrap().unwrap();
    app.shutdown();
    workers.join().await;
}
