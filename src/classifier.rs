//! Classification backends.
//!
//! - **[`DisabledClassifier`]**: always errors. Imports fail per item and
//!   hybrid search runs without intent labels.
//! - **[`OllamaClassifier`]**: prompts a local model through
//!   `POST /api/generate` and parses the JSON it returns.
//!
//! The prompt is a template file (`classifier.prompt_path`) with the item
//! text appended verbatim. Without a template file a built-in prompt asking
//! for `C1_Topic_Scores`, `C2_Type_Scores` and `summary` is used.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use knowledge_hub_core::classify::{parse_classification, Classification, Classifier};

use crate::config::ClassifierConfig;

const DEFAULT_PROMPT: &str = r#"You are a knowledge librarian. Score the text below against the label taxonomy.
Give every relevant label an integer score from 0 (irrelevant) to 5 (central topic),
then write a one-sentence summary. Reply with JSON only, in this shape:

{"C1_Topic_Scores": {"<topic label>": <score>}, "C2_Type_Scores": {"<type label>": <score>}, "summary": "<summary>"}

Text:
"#;

/// Classifier used when `classifier.provider = "disabled"`.
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification> {
        bail!("Classifier is disabled")
    }
}

/// Classifier backed by an Ollama server.
pub struct OllamaClassifier {
    client: reqwest::Client,
    url: String,
    model: String,
    prompt: String,
}

impl OllamaClassifier {
    /// Build the client and load the prompt template.
    ///
    /// # Errors
    ///
    /// Returns an error if the template file cannot be read or the HTTP
    /// client cannot be built.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let prompt = match &config.prompt_path {
            Some(path) => std::fs::read_to_string(path).with_context(|| {
                format!("Failed to read classifier prompt: {}", path.display())
            })?,
            None => DEFAULT_PROMPT.to_string(),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            prompt,
        })
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(&self, text: &str) -> Result<Classification> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": format!("{}{}", self.prompt, text),
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .context("classifier request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama generate error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let generated = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))?;

        let classification = parse_classification(generated)?;
        tracing::debug!(
            labels = classification.labels.len(),
            "classified text"
        );
        Ok(classification)
    }
}

/// Create the configured classifier.
pub fn create_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClassifier)),
        "ollama" => Ok(Arc::new(OllamaClassifier::new(config)?)),
        other => bail!("Unknown classifier provider: {}", other),
    }
}
