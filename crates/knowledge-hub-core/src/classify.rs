//! Classification collaborator and response parsing.
//!
//! A generative model is prompted to score the text against the label
//! taxonomy and summarize it. Models tend to wrap their JSON in prose or
//! Markdown fences, so [`extract_json`] recovers the object before
//! [`parse_classification`] reads it.
//!
//! Accepted response shapes:
//!
//! ```json
//! { "C1_Topic_Scores": {"rust": 5}, "C2_Type_Scores": {"howto": 4}, "summary": "..." }
//! { "labels": [{"label": "rust", "score": 5}], "summary": "..." }
//! ```
//!
//! Every object-valued field whose values are all integers is read as a
//! label → score map, so new categories need no code change.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::models::LabelScore;

/// Labels and summary for one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Classification {
    pub labels: Vec<LabelScore>,
    pub summary: String,
}

/// Classifies text into scored labels plus a summary.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification>;
}

/// Pull the JSON object out of a model response.
pub fn extract_json(response: &str) -> Result<&str> {
    if let Some(start) = response.find("```json") {
        let body = &response[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Ok(body[..end].trim());
        }
    }

    let start = response
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in model response"))?;
    let end = response
        .rfind('}')
        .ok_or_else(|| anyhow!("no JSON object in model response"))?;
    if end < start {
        bail!("no JSON object in model response");
    }
    Ok(&response[start..=end])
}

/// Parse a model response into a [`Classification`].
pub fn parse_classification(response: &str) -> Result<Classification> {
    let json_str = extract_json(response)?;
    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| anyhow!("invalid classification JSON: {}", e))?;
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("classification response is not a JSON object"))?;

    let mut out = Classification::default();

    for (key, field) in obj {
        match field {
            serde_json::Value::String(s) if key == "summary" => out.summary = s.clone(),
            serde_json::Value::Array(entries) if key == "labels" => {
                for entry in entries {
                    let label = entry
                        .get("label")
                        .or_else(|| entry.get("label_id"))
                        .and_then(|v| v.as_str());
                    let score = entry.get("score").and_then(|v| v.as_i64());
                    if let (Some(label), Some(score)) = (label, score) {
                        out.labels.push(LabelScore::new(label, score));
                    }
                }
            }
            serde_json::Value::Object(map) => {
                if map.values().all(|v| v.as_i64().is_some()) {
                    for (label, score) in map {
                        if let Some(score) = score.as_i64() {
                            out.labels.push(LabelScore::new(label.clone(), score));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(out)
}
