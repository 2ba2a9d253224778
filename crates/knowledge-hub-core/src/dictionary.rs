//! Label dictionary: label name → sparse-vector coordinate.
//!
//! The mapping file groups labels by category, one JSON object per
//! category, and all categories share a single index space:
//!
//! ```json
//! {
//!   "C1_Topic": { "rust": 1, "networking": 2 },
//!   "C2_Type":  { "howto": 101, "reference": 102 }
//! }
//! ```
//!
//! Categories are merged at load time. The dictionary is immutable once
//! built, so it can be shared freely behind an `Arc`.

use anyhow::{Context, Result};
use std::collections::HashMap;

/// Read-only label → index map.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    label_to_index: HashMap<String, u32>,
}

impl Dictionary {
    /// Parse a categorized mapping document.
    ///
    /// Non-object category values are rejected. When a label appears in
    /// more than one category, the later category wins and a warning is
    /// logged.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let categories: HashMap<String, HashMap<String, u32>> =
            serde_json::from_str(json).context("Failed to parse label dictionary JSON")?;

        // Sort categories so the "later wins" rule is deterministic.
        let mut names: Vec<&String> = categories.keys().collect();
        names.sort();

        let mut label_to_index = HashMap::new();
        for name in names {
            for (label, index) in &categories[name] {
                if let Some(prev) = label_to_index.insert(label.clone(), *index) {
                    if prev != *index {
                        tracing::warn!(
                            label = %label,
                            category = %name,
                            previous = prev,
                            index = *index,
                            "label defined twice in dictionary; keeping the later index"
                        );
                    }
                }
            }
        }

        Ok(Self { label_to_index })
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            label_to_index: entries.into_iter().map(|(l, i)| (l.into(), i)).collect(),
        }
    }

    pub fn index_of(&self, label: &str) -> Option<u32> {
        self.label_to_index.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.label_to_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_to_index.is_empty()
    }
}
