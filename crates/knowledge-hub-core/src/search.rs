//! Ranking engine with keyword, semantic, and hybrid retrieval modes.
//!
//! The algorithm runs entirely through the collaborator traits, with no
//! database or configuration dependencies. The calling application wires
//! concrete backends into a [`SearchContext`] and passes tuning values in
//! [`SearchParams`].
//!
//! # Hybrid Algorithm
//!
//! 1. Classify the query to get intent labels. A classifier failure is
//!    logged and the search continues with no labels.
//! 2. Map labels to dictionary indices to build a sparse vector
//!    (see [`build_sparse_vector`]).
//! 3. Embed the query. Failure is fatal.
//! 4. Query the vector store: sparse prefetch of
//!    `limit × prefetch_multiplier` candidates, then dense ranking of those
//!    candidates. With no labels the prefetch is skipped.
//! 5. Hydrate hits from the relational store, dropping misses and
//!    repository mismatches.
//! 6. Optionally add keyword matches not already present, scored
//!    `1.0 × keyword_fallback_weight`.
//! 7. Sort by score (desc), id (asc). Truncate to `limit`.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;

use crate::classify::Classifier;
use crate::dictionary::Dictionary;
use crate::embedding::Embedder;
use crate::labels::build_sparse_vector;
use crate::models::{SearchMode, SearchResult};
use crate::store::KnowledgeStore;
use crate::vector::{ScoredPoint, VectorIndex, VectorQuery};

/// Score assigned to plain keyword hits.
pub const KEYWORD_SCORE: f64 = 1.0;

/// When hybrid search tops up its results with keyword matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordFallback {
    Never,
    /// Only when the vector stage returned fewer than `limit` results.
    #[default]
    WhenInsufficient,
    Always,
}

impl FromStr for KeywordFallback {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "never" => Ok(KeywordFallback::Never),
            "when_insufficient" => Ok(KeywordFallback::WhenInsufficient),
            "always" => Ok(KeywordFallback::Always),
            other => bail!(
                "unknown keyword fallback policy: {}. Use never, when_insufficient, or always.",
                other
            ),
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Sparse prefetch keeps `limit × prefetch_multiplier` candidates.
    pub prefetch_multiplier: usize,
    pub keyword_fallback: KeywordFallback,
    /// Multiplier applied to keyword fallback scores.
    pub keyword_fallback_weight: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            prefetch_multiplier: 3,
            keyword_fallback: KeywordFallback::WhenInsufficient,
            keyword_fallback_weight: 0.8,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Only return items from this repository.
    pub repo_name: Option<&'a str>,
    pub mode: SearchMode,
    /// Maximum results to return. Values below 1 are treated as 1.
    pub limit: usize,
    pub params: SearchParams,
}

/// The collaborators a search needs.
pub struct SearchContext<'a> {
    pub store: &'a dyn KnowledgeStore,
    pub vectors: &'a dyn VectorIndex,
    pub classifier: &'a dyn Classifier,
    pub embedder: &'a dyn Embedder,
    pub dictionary: &'a Dictionary,
}

/// Run a search against the wired backends.
///
/// This is the core function that all frontends (CLI, HTTP) delegate to.
pub async fn search(ctx: &SearchContext<'_>, req: &SearchRequest<'_>) -> Result<Vec<SearchResult>> {
    if req.query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let limit = req.limit.max(1);

    let mut results = match req.mode {
        SearchMode::Keyword => keyword_results(ctx, req.query, req.repo_name, limit).await?,
        SearchMode::Semantic => {
            let dense = ctx.embedder.embed(req.query).await?;
            let hits = ctx
                .vectors
                .query(&VectorQuery {
                    dense,
                    sparse: None,
                    prefetch_limit: 0,
                    repo_name: req.repo_name.map(str::to_string),
                    limit,
                })
                .await?;
            hydrate(ctx, hits, req.repo_name).await
        }
        SearchMode::Hybrid => hybrid(ctx, req, limit).await?,
    };

    sort_results(&mut results);
    results.truncate(limit);
    Ok(results)
}

async fn hybrid(
    ctx: &SearchContext<'_>,
    req: &SearchRequest<'_>,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let labels = match ctx.classifier.classify(req.query).await {
        Ok(c) => c.labels,
        Err(e) => {
            tracing::warn!(error = %e, "query classification failed; searching without intent labels");
            Vec::new()
        }
    };
    let sparse = build_sparse_vector(&labels, ctx.dictionary);
    tracing::debug!(
        labels = labels.len(),
        indices = sparse.indices.len(),
        "hybrid search intent"
    );

    let dense = ctx.embedder.embed(req.query).await?;
    let query = VectorQuery {
        dense,
        prefetch_limit: limit.saturating_mul(req.params.prefetch_multiplier.max(1)),
        sparse: if sparse.is_empty() { None } else { Some(sparse) },
        repo_name: req.repo_name.map(str::to_string),
        limit,
    };
    let hits = ctx.vectors.query(&query).await?;
    let mut results = hydrate(ctx, hits, req.repo_name).await;

    let fallback_limit = match req.params.keyword_fallback {
        KeywordFallback::Never => 0,
        KeywordFallback::WhenInsufficient => limit.saturating_sub(results.len()),
        KeywordFallback::Always => limit,
    };
    if fallback_limit > 0 {
        match keyword_results(ctx, req.query, req.repo_name, fallback_limit).await {
            Ok(extra) => {
                let seen: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();
                for mut r in extra {
                    if seen.contains(&r.id) {
                        continue;
                    }
                    r.score *= req.params.keyword_fallback_weight;
                    results.push(r);
                }
            }
            Err(e) => tracing::warn!(error = %e, "keyword fallback failed"),
        }
    }

    Ok(results)
}

async fn keyword_results(
    ctx: &SearchContext<'_>,
    query: &str,
    repo_name: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let items = ctx.store.keyword_search(query, repo_name, limit).await?;
    Ok(items
        .into_iter()
        .map(|item| SearchResult::from_item(item, KEYWORD_SCORE))
        .collect())
}

/// Load full items for vector hits, keeping the vector score.
async fn hydrate(
    ctx: &SearchContext<'_>,
    hits: Vec<ScoredPoint>,
    repo_name: Option<&str>,
) -> Vec<SearchResult> {
    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        match ctx.store.get_knowledge(&hit.id).await {
            Ok(Some(item)) => {
                if repo_name.is_some_and(|r| item.repo_name != r) {
                    continue;
                }
                out.push(SearchResult::from_item(item, hit.score));
            }
            Ok(None) => {
                tracing::debug!(id = %hit.id, "vector hit has no knowledge row");
            }
            Err(e) => {
                tracing::warn!(id = %hit.id, error = %e, "failed to hydrate vector hit");
            }
        }
    }
    out
}

/// Score descending, id ascending for ties.
fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classification;
    use crate::models::{KnowledgeItem, LabelScore};
    use crate::store::memory::{InMemoryStore, InMemoryVectorIndex};
    use crate::vector::{PointPayload, VectorPoint};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubClassifier {
        labels: Option<Vec<LabelScore>>,
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        async fn classify(&self, _text: &str) -> Result<Classification> {
            match &self.labels {
                Some(labels) => Ok(Classification {
                    labels: labels.clone(),
                    summary: String::new(),
                }),
                None => bail!("classifier offline"),
            }
        }
    }

    struct StubEmbedder {
        vectors: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no vector for {}", text))
        }
    }

    struct Fixture {
        store: InMemoryStore,
        vectors: InMemoryVectorIndex,
        classifier: StubClassifier,
        embedder: StubEmbedder,
        dictionary: Dictionary,
    }

    impl Fixture {
        fn new(query_labels: Option<Vec<LabelScore>>) -> Self {
            Self {
                store: InMemoryStore::new(),
                vectors: InMemoryVectorIndex::new(),
                classifier: StubClassifier {
                    labels: query_labels,
                },
                embedder: StubEmbedder {
                    vectors: HashMap::from([("query".to_string(), vec![1.0, 0.0])]),
                },
                dictionary: Dictionary::from_entries([("rust", 1), ("go", 2)]),
            }
        }

        async fn add(
            &self,
            id: &str,
            repo: &str,
            content: &str,
            dense: Vec<f32>,
            labels: &[(&str, i64)],
        ) {
            let labels: Vec<LabelScore> =
                labels.iter().map(|(l, s)| LabelScore::new(*l, *s)).collect();
            let item = KnowledgeItem {
                id: id.to_string(),
                repo_name: repo.to_string(),
                content: content.to_string(),
                labels: labels.clone(),
                summary: String::new(),
                created_at: 0,
                updated_at: 0,
            };
            self.store.upsert_knowledge(&item).await.unwrap();
            self.vectors
                .upsert(VectorPoint {
                    id: id.to_string(),
                    dense,
                    sparse: build_sparse_vector(&labels, &self.dictionary),
                    payload: PointPayload {
                        repo_name: repo.to_string(),
                        content: content.to_string(),
                        labels: labels.iter().map(|l| l.label.clone()).collect(),
                        summary: String::new(),
                    },
                })
                .await
                .unwrap();
        }

        fn ctx(&self) -> SearchContext<'_> {
            SearchContext {
                store: &self.store,
                vectors: &self.vectors,
                classifier: &self.classifier,
                embedder: &self.embedder,
                dictionary: &self.dictionary,
            }
        }
    }

    fn request(mode: SearchMode, limit: usize, fallback: KeywordFallback) -> SearchRequest<'static> {
        SearchRequest {
            query: "query",
            repo_name: None,
            mode,
            limit,
            params: SearchParams {
                keyword_fallback: fallback,
                ..SearchParams::default()
            },
        }
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let f = Fixture::new(None);
        let mut req = request(SearchMode::Hybrid, 5, KeywordFallback::Never);
        req.query = "   ";
        assert!(search(&f.ctx(), &req).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_classifier_failure_degrades_to_dense() {
        let f = Fixture::new(None);
        f.add("a", "r", "alpha", vec![0.2, 1.0], &[]).await;
        f.add("b", "r", "beta", vec![1.0, 0.1], &[("rust", 5)]).await;
        f.add("c", "r", "gamma", vec![1.0, 0.5], &[]).await;

        let results = search(&f.ctx(), &request(SearchMode::Hybrid, 5, KeywordFallback::Never))
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        for pair in results.windows(2) {
            assert!(pair[0].score > pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_limit_larger_than_candidates_is_not_padded() {
        let f = Fixture::new(Some(vec![]));
        f.add("a", "r", "alpha", vec![1.0, 0.0], &[]).await;
        f.add("b", "r", "beta", vec![0.5, 0.5], &[]).await;
        f.add("c", "r", "gamma", vec![0.0, 1.0], &[]).await;

        let results = search(
            &f.ctx(),
            &request(SearchMode::Hybrid, 5, KeywordFallback::WhenInsufficient),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_intent_labels_prefetch_candidates() {
        let f = Fixture::new(Some(vec![LabelScore::new("rust", 4)]));
        // Closest in dense space but carries no matching label.
        f.add("near", "r", "near", vec![1.0, 0.0], &[("go", 5)]).await;
        f.add("labelled", "r", "labelled", vec![0.6, 0.8], &[("rust", 5)])
            .await;

        let results = search(&f.ctx(), &request(SearchMode::Hybrid, 1, KeywordFallback::Never))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "labelled");
        assert!((results[0].score - 0.6).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_unknown_intent_labels_run_dense_query() {
        let f = Fixture::new(Some(vec![LabelScore::new("cobol", 9)]));
        f.add("a", "r", "alpha", vec![1.0, 0.0], &[("go", 5)]).await;
        let results = search(&f.ctx(), &request(SearchMode::Hybrid, 5, KeywordFallback::Never))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_keyword_mode_scores_one() {
        let f = Fixture::new(None);
        f.add("a", "r", "contains the query token", vec![0.0, 1.0], &[])
            .await;
        f.add("b", "r", "unrelated", vec![1.0, 0.0], &[]).await;

        let results = search(&f.ctx(), &request(SearchMode::Keyword, 5, KeywordFallback::Never))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_keyword_fallback_weighted_and_deduplicated() {
        let f = Fixture::new(Some(vec![LabelScore::new("rust", 4)]));
        f.add("vec", "r", "query in vector hit", vec![1.0, 0.0], &[("rust", 5)])
            .await;
        f.add("kw", "r", "query only by keyword", vec![0.0, 1.0], &[])
            .await;

        let results = search(
            &f.ctx(),
            &request(SearchMode::Hybrid, 5, KeywordFallback::WhenInsufficient),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "vec");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results[1].id, "kw");
        assert!((results[1].score - 0.8).abs() < 1e-9);

        let never = search(&f.ctx(), &request(SearchMode::Hybrid, 5, KeywordFallback::Never))
            .await
            .unwrap();
        assert_eq!(never.len(), 1);
    }

    #[tokio::test]
    async fn test_repo_filter() {
        let f = Fixture::new(None);
        f.add("a", "docs", "alpha", vec![1.0, 0.0], &[]).await;
        f.add("b", "wiki", "beta", vec![1.0, 0.0], &[]).await;

        let mut req = request(SearchMode::Semantic, 5, KeywordFallback::Never);
        req.repo_name = Some("wiki");
        let results = search(&f.ctx(), &req).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].repo_name, "wiki");
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let f = Fixture::new(Some(vec![]));
        let mut req = request(SearchMode::Hybrid, 5, KeywordFallback::Always);
        req.query = "no vector for this";
        assert!(search(&f.ctx(), &req).await.is_err());
        req.mode = SearchMode::Semantic;
        assert!(search(&f.ctx(), &req).await.is_err());
    }

    #[test]
    fn test_sort_ties_by_id() {
        let mk = |id: &str, score: f64| SearchResult {
            id: id.to_string(),
            repo_name: String::new(),
            content: String::new(),
            labels: Vec::new(),
            summary: String::new(),
            score,
        };
        let mut results = vec![mk("b", 0.5), mk("c", 0.9), mk("a", 0.5)];
        sort_results(&mut results);
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_fallback_policy_parse() {
        assert_eq!(
            "always".parse::<KeywordFallback>().unwrap(),
            KeywordFallback::Always
        );
        assert!("sometimes".parse::<KeywordFallback>().is_err());
    }
}
