use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use knowledge_hub_core::search::{KeywordFallback, SearchParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub dictionary: DictionaryConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_batch: default_poll_batch(),
            item_delay_ms: default_item_delay_ms(),
        }
    }
}

fn default_workers() -> usize {
    3
}
fn default_channel_capacity() -> usize {
    100
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_poll_batch() -> usize {
    20
}
fn default_item_delay_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct DictionaryConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_provider")]
    pub provider: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
    #[serde(default = "default_label_threshold")]
    pub label_threshold: i64,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_classifier_provider(),
            url: default_ollama_url(),
            model: default_classifier_model(),
            prompt_path: None,
            label_threshold: default_label_threshold(),
            timeout_secs: default_classifier_timeout_secs(),
        }
    }
}

fn default_classifier_provider() -> String {
    "ollama".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_classifier_model() -> String {
    "llama3".to_string()
}
fn default_label_threshold() -> i64 {
    3
}
fn default_classifier_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            url: default_ollama_url(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_vector_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            timeout_secs: default_vector_timeout_secs(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "knowledge".to_string()
}
fn default_vector_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_prefetch_multiplier")]
    pub prefetch_multiplier: usize,
    #[serde(default)]
    pub keyword_fallback: KeywordFallback,
    #[serde(default = "default_keyword_fallback_weight")]
    pub keyword_fallback_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            prefetch_multiplier: default_prefetch_multiplier(),
            keyword_fallback: KeywordFallback::default(),
            keyword_fallback_weight: default_keyword_fallback_weight(),
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_prefetch_multiplier() -> usize {
    3
}
fn default_keyword_fallback_weight() -> f64 {
    0.8
}

impl RetrievalConfig {
    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            prefetch_multiplier: self.prefetch_multiplier,
            keyword_fallback: self.keyword_fallback,
            keyword_fallback_weight: self.keyword_fallback_weight,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate queue
    if config.queue.workers == 0 {
        anyhow::bail!("queue.workers must be >= 1");
    }
    if config.queue.channel_capacity == 0 {
        anyhow::bail!("queue.channel_capacity must be >= 1");
    }
    if config.queue.poll_interval_secs == 0 {
        anyhow::bail!("queue.poll_interval_secs must be >= 1");
    }
    if config.queue.poll_batch == 0 {
        anyhow::bail!("queue.poll_batch must be >= 1");
    }

    // Validate retrieval
    if config.retrieval.default_limit < 1 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }
    if config.retrieval.prefetch_multiplier < 1 {
        anyhow::bail!("retrieval.prefetch_multiplier must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.keyword_fallback_weight) {
        anyhow::bail!("retrieval.keyword_fallback_weight must be in [0.0, 1.0]");
    }

    // Validate classifier
    if config.classifier.label_threshold < 0 {
        anyhow::bail!("classifier.label_threshold must be >= 0");
    }
    match config.classifier.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown classifier provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.vector_store.collection.trim().is_empty() {
        anyhow::bail!("vector_store.collection must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/khub.sqlite"

[server]
bind = "127.0.0.1:8080"

[dictionary]
path = "./config/labels.json"
"#;

    fn parse(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let cfg = parse(MINIMAL).unwrap();
        assert_eq!(cfg.queue.workers, 3);
        assert_eq!(cfg.queue.channel_capacity, 100);
        assert_eq!(cfg.queue.poll_interval_secs, 5);
        assert_eq!(cfg.queue.item_delay_ms, 100);
        assert_eq!(cfg.classifier.label_threshold, 3);
        assert_eq!(cfg.retrieval.default_limit, 5);
        assert_eq!(cfg.retrieval.prefetch_multiplier, 3);
        assert_eq!(
            cfg.retrieval.keyword_fallback,
            KeywordFallback::WhenInsufficient
        );
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_fallback_policy_from_toml() {
        let cfg = parse(&format!(
            "{}\n[retrieval]\nkeyword_fallback = \"always\"\n",
            MINIMAL
        ))
        .unwrap();
        assert_eq!(cfg.retrieval.keyword_fallback, KeywordFallback::Always);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = parse(&format!("{}\n[queue]\nworkers = 0\n", MINIMAL)).unwrap_err();
        assert!(err.to_string().contains("queue.workers"));
    }

    #[test]
    fn test_enabled_embedding_needs_model() {
        let err = parse(&format!(
            "{}\n[embedding]\nprovider = \"ollama\"\ndims = 768\n",
            MINIMAL
        ))
        .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_rejects_negative_label_threshold() {
        let err = parse(&format!(
            "{}\n[classifier]\nlabel_threshold = -1\n",
            MINIMAL
        ))
        .unwrap_err();
        assert!(err.to_string().contains("classifier.label_threshold"));
    }

    #[test]
    fn test_unknown_classifier_provider() {
        assert!(parse(&format!("{}\n[classifier]\nprovider = \"gpt\"\n", MINIMAL)).is_err());
    }
}
