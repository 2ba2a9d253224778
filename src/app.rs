//! Service wiring.
//!
//! [`App`] owns every long-lived component: stores, collaborator clients,
//! the dictionary, the task queue, and the import service. The CLI and the
//! HTTP server both work through it. [`Backends`] is the seam where tests
//! swap SQLite and the HTTP clients for in-memory doubles.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use knowledge_hub_core::classify::{Classification, Classifier};
use knowledge_hub_core::dictionary::Dictionary;
use knowledge_hub_core::embedding::Embedder;
use knowledge_hub_core::models::{SearchMode, SearchResult};
use knowledge_hub_core::search::{self as engine, SearchContext, SearchRequest};
use knowledge_hub_core::store::{KnowledgeStore, QueueStore, TaskStore};
use knowledge_hub_core::vector::VectorIndex;

use crate::classifier::create_classifier;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::error::{ServiceError, ServiceResult};
use crate::migrate;
use crate::qdrant::QdrantIndex;
use crate::queue::{QueueSettings, TaskQueueService};
use crate::sqlite_store::SqliteStore;
use crate::tasks::ImportService;
use crate::worker::{Pipeline, PipelineSettings, WorkerPool};

/// Storage and collaborator implementations.
#[derive(Clone)]
pub struct Backends {
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub queue: Arc<dyn QueueStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub classifier: Arc<dyn Classifier>,
    pub embedder: Arc<dyn Embedder>,
    pub dictionary: Arc<Dictionary>,
}

impl Backends {
    /// Use one store for knowledge, tasks, and the queue.
    pub fn with_store<S>(
        store: Arc<S>,
        vectors: Arc<dyn VectorIndex>,
        classifier: Arc<dyn Classifier>,
        embedder: Arc<dyn Embedder>,
        dictionary: Arc<Dictionary>,
    ) -> Self
    where
        S: KnowledgeStore + TaskStore + QueueStore + 'static,
    {
        Self {
            knowledge: store.clone(),
            tasks: store.clone(),
            queue: store,
            vectors,
            classifier,
            embedder,
            dictionary,
        }
    }
}

/// Background work started by [`App::start_workers`].
pub struct Workers {
    pool: WorkerPool,
    poller: JoinHandle<()>,
}

impl Workers {
    /// Wait for the pool and poller to exit after the queue shuts down.
    pub async fn join(self) {
        self.pool.join().await;
        if let Err(e) = self.poller.await {
            tracing::error!(error = %e, "queue poller panicked");
        }
    }
}

pub struct App {
    pub config: Arc<Config>,
    pub backends: Backends,
    pub queue: Arc<TaskQueueService>,
    pub imports: ImportService,
}

impl App {
    /// Open the database (running migrations) and build the configured
    /// collaborator clients.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let dictionary = load_dictionary(config)?;
        let classifier = create_classifier(&config.classifier)?;
        let embedder = create_embedder(&config.embedding)?;
        let vectors = Arc::new(QdrantIndex::new(&config.vector_store, embedder.dims())?);

        tracing::info!(
            labels = dictionary.len(),
            classifier = %config.classifier.provider,
            embedder = embedder.model_name(),
            collection = %config.vector_store.collection,
            "backends ready"
        );

        let backends = Backends::with_store(
            store,
            vectors,
            classifier,
            embedder,
            Arc::new(dictionary),
        );
        Ok(Self::new(config, backends))
    }

    pub fn new(config: &Config, backends: Backends) -> Self {
        let queue = TaskQueueService::new(
            backends.queue.clone(),
            QueueSettings::from(&config.queue),
        );
        let imports = ImportService::new(backends.tasks.clone(), queue.clone());
        Self {
            config: Arc::new(config.clone()),
            backends,
            queue,
            imports,
        }
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        let b = &self.backends;
        Arc::new(Pipeline {
            tasks: b.tasks.clone(),
            knowledge: b.knowledge.clone(),
            vectors: b.vectors.clone(),
            classifier: b.classifier.clone(),
            embedder: b.embedder.clone(),
            dictionary: b.dictionary.clone(),
            settings: PipelineSettings {
                label_threshold: self.config.classifier.label_threshold,
                item_delay: Duration::from_millis(self.config.queue.item_delay_ms),
            },
        })
    }

    /// Recover unfinished tasks, then start the worker pool and poller.
    pub async fn start_workers(&self) -> Result<Workers> {
        self.imports
            .recover()
            .await
            .context("failed to recover unfinished tasks")?;
        let pool = WorkerPool::start(self.config.queue.workers, self.queue.clone(), self.pipeline());
        let poller = self.queue.spawn_poller();
        tracing::info!(workers = pool.size(), "worker pool started");
        Ok(Workers { pool, poller })
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Validate inputs and run the ranking engine.
    ///
    /// `mode` defaults to hybrid and `limit` to `retrieval.default_limit`.
    pub async fn search(
        &self,
        query: &str,
        repo_name: Option<&str>,
        mode: Option<&str>,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<SearchResult>> {
        let mode = match mode {
            Some(m) => m
                .parse::<SearchMode>()
                .map_err(|e| ServiceError::Validation(e.to_string()))?,
            None => SearchMode::default(),
        };
        let limit = match limit {
            Some(l) if l < 1 => {
                return Err(ServiceError::Validation("limit must be >= 1".into()));
            }
            Some(l) => l as usize,
            None => self.config.retrieval.default_limit,
        };
        let repo_name = repo_name.map(str::trim).filter(|r| !r.is_empty());

        let b = &self.backends;
        let ctx = SearchContext {
            store: b.knowledge.as_ref(),
            vectors: b.vectors.as_ref(),
            classifier: b.classifier.as_ref(),
            embedder: b.embedder.as_ref(),
            dictionary: &b.dictionary,
        };
        let req = SearchRequest {
            query,
            repo_name,
            mode,
            limit,
            params: self.config.retrieval.search_params(),
        };
        Ok(engine::search(&ctx, &req).await?)
    }

    pub async fn list_repos(&self) -> ServiceResult<Vec<String>> {
        Ok(self.backends.knowledge.list_repos().await?)
    }

    pub async fn classify(&self, text: &str) -> ServiceResult<Classification> {
        if text.trim().is_empty() {
            return Err(ServiceError::Validation("text must not be empty".into()));
        }
        Ok(self.backends.classifier.classify(text).await?)
    }
}

fn load_dictionary(config: &Config) -> Result<Dictionary> {
    let path = &config.dictionary.path;
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read label dictionary: {}", path.display()))?;
    Dictionary::from_json_str(&json)
        .with_context(|| format!("Invalid label dictionary: {}", path.display()))
}
